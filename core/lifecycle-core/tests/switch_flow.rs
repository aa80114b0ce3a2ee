use lifecycle_core::{
    load_config, toggle_target, ExclusiveSession, LifecycleError, ManagedProcess, ModeTag,
    ProcessTable, RetryPolicy, ServiceControl, ServiceVerb, SessionState, StateStore,
    SwitchController, SwitchOptions,
};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Shared in-memory process table.
#[derive(Clone, Default)]
struct Processes {
    running: Arc<Mutex<BTreeMap<u32, String>>>,
    next_pid: Arc<AtomicU32>,
}

impl Processes {
    fn launch(&self, name: &str) {
        let pid = 2000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().insert(pid, name.to_string());
    }

    fn names(&self) -> Vec<String> {
        self.running.lock().unwrap().values().cloned().collect()
    }
}

impl ProcessTable for Processes {
    fn find_by_name(&self, name: &str) -> Vec<u32> {
        self.running
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, running)| running.as_str() == name)
            .map(|(pid, _)| *pid)
            .collect()
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        self.running.lock().unwrap().remove(&pid);
        Ok(())
    }
}

/// Init scripts whose `start` launches the named process.
#[derive(Clone)]
struct Scripts {
    processes: Processes,
    starts: BTreeMap<PathBuf, String>,
}

impl ServiceControl for Scripts {
    fn run(&self, service: &Path, verb: ServiceVerb) -> lifecycle_core::Result<()> {
        if verb == ServiceVerb::Start {
            if let Some(process) = self.starts.get(service) {
                self.processes.launch(process);
            }
        }
        Ok(())
    }
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("controller.toml");
    let content = format!(
        r#"
[switch]
lock_path = "{lock}"
state_path = "{state}"
kill_attempts = 3
kill_interval_ms = 5
start_attempts = 3
start_interval_ms = 5

[sessions.alpha]
process = "alpha"
service = "/etc/init.d/alpha"

[[sessions.alpha.toggles]]
active = "{bin}/alpha"

[sessions.beta]
process = "beta"
service = "/etc/init.d/beta"

[[sessions.beta.toggles]]
active = "{bin}/beta"
"#,
        lock = dir.join("switch.lock").display(),
        state = dir.join("ui.mode").display(),
        bin = dir.display(),
    );
    fs_err::write(&path, content).expect("write config");
    fs_err::write(dir.join("alpha"), "alpha").expect("alpha binary");
    fs_err::write(dir.join("beta.disabled"), "beta").expect("beta binary");
    path
}

fn controller(
    config: &lifecycle_core::ControllerConfig,
    processes: &Processes,
) -> SwitchController<Processes, Scripts> {
    let mut starts = BTreeMap::new();
    starts.insert(PathBuf::from("/etc/init.d/alpha"), "alpha".to_string());
    starts.insert(PathBuf::from("/etc/init.d/beta"), "beta".to_string());
    SwitchController::new(
        ExclusiveSession::new(config.switch.lock_path.clone()),
        StateStore::new(config.switch.state_path.clone()),
        ManagedProcess::new(processes.clone()),
        Scripts {
            processes: processes.clone(),
            starts,
        },
        SwitchOptions::from(&config.switch),
    )
}

#[test]
fn switch_back_and_forth_from_config() {
    let dir = TempDir::new().expect("temp dir");
    let config = load_config(Some(write_config(dir.path()))).expect("config");
    let processes = Processes::default();
    processes.launch("alpha");
    let controller = controller(&config, &processes);

    assert_eq!(controller.current_state(), SessionState::Unknown);

    let beta = ModeTag::parse("beta").unwrap();
    let report = controller
        .switch(&config.counterpart(&beta).unwrap(), &config.session(&beta).unwrap())
        .expect("switch to beta");
    assert_eq!(report.to, beta);
    assert_eq!(processes.names(), vec!["beta".to_string()]);
    assert_eq!(
        fs_err::read_to_string(&config.switch.state_path).unwrap().trim(),
        "beta"
    );
    assert!(dir.path().join("alpha.disabled").exists());
    assert!(!dir.path().join("alpha").exists());

    let state = controller.current_state();
    let next = toggle_target(&config, &state, |name| controller.is_running(name)).unwrap();
    assert_eq!(next.as_str(), "alpha");

    controller
        .switch(&config.counterpart(&next).unwrap(), &config.session(&next).unwrap())
        .expect("switch back to alpha");
    assert_eq!(processes.names(), vec!["alpha".to_string()]);
    assert_eq!(controller.current_state().mode(), Some(&next));
    assert!(dir.path().join("alpha").exists());
    assert!(dir.path().join("beta.disabled").exists());
}

#[test]
fn concurrent_switches_serialize_through_the_lock() {
    let dir = TempDir::new().expect("temp dir");
    let config = load_config(Some(write_config(dir.path()))).expect("config");
    let lock_path = config.switch.lock_path.clone();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let path = lock_path.clone();
            thread::spawn(move || {
                let session = ExclusiveSession::new(path);
                barrier.wait();
                let lock = session.try_acquire().expect("lock io");
                let won = lock.is_some();
                // Hold long enough for the loser to observe contention.
                thread::sleep(Duration::from_millis(100));
                drop(lock);
                won
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn switch_during_held_lock_reports_contention() {
    let dir = TempDir::new().expect("temp dir");
    let config = load_config(Some(write_config(dir.path()))).expect("config");
    let processes = Processes::default();
    processes.launch("alpha");
    let controller = controller(&config, &processes);

    let _held = ExclusiveSession::new(config.switch.lock_path.clone())
        .acquire()
        .expect("hold lock");

    let beta = ModeTag::parse("beta").unwrap();
    let err = controller
        .switch(&config.counterpart(&beta).unwrap(), &config.session(&beta).unwrap())
        .unwrap_err();
    assert!(matches!(err, LifecycleError::LockContention(_)));
    assert!(err.to_string().contains("already in progress"));
    assert_eq!(processes.names(), vec!["alpha".to_string()]);
    assert!(!config.switch.state_path.exists());
}

#[test]
fn bounded_start_wait_surfaces_fatal_error() {
    let dir = TempDir::new().expect("temp dir");
    let config = load_config(Some(write_config(dir.path()))).expect("config");
    let processes = Processes::default();
    let controller = SwitchController::new(
        ExclusiveSession::new(config.switch.lock_path.clone()),
        StateStore::new(config.switch.state_path.clone()),
        ManagedProcess::new(processes.clone()),
        Scripts {
            processes: processes.clone(),
            starts: BTreeMap::new(),
        },
        SwitchOptions {
            kill_policy: RetryPolicy::new(2, Duration::from_millis(5)),
            start_policy: RetryPolicy::new(4, Duration::from_millis(5)),
            restore_on_failure: true,
        },
    );

    let beta = ModeTag::parse("beta").unwrap();
    let err = controller
        .switch(&config.counterpart(&beta).unwrap(), &config.session(&beta).unwrap())
        .unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::StartVerificationFailed { attempts: 4, .. }
    ));
    assert!(err.is_fatal());
    assert_eq!(controller.current_state(), SessionState::Unknown);
}
