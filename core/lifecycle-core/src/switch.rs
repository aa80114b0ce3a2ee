//! One-shot transition between two mutually exclusive UI sessions.
//!
//! ## Sequence
//!
//! 1. Acquire the session lock (fail fast on contention)
//! 2. Disable the loser's binaries, stop and disable its service
//! 3. Verified stop of the loser's primary and helper processes
//! 4. Release the lock
//! 5. Re-enable the winner's binaries
//! 6. Enable and start the winner's service, start helper daemons
//! 7. Wait for the winner's primary process
//! 8. Persist the winning mode
//!
//! Steps 2, 3 and 6 are best-effort: failures become warnings in the
//! [`SwitchReport`]. Contention and a winner that never appears are fatal,
//! and the state file is left untouched.
//!
//! When the winner never appears and `restore_on_failure` is set, the loser
//! is brought back the same way before the error is returned. The restore is
//! skipped if another switch grabbed the lock in the meantime.

use std::iter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ControllerConfig, SwitchConfig};
use crate::error::{LifecycleError, Result};
use crate::process::{
    ManagedProcess, ManagedProcessHandle, ProcessTable, RetryPolicy, SystemProcessTable,
};
use crate::service::{InitScriptControl, ServiceControl, ServiceVerb};
use crate::session::{ExclusiveSession, ModeTag, SessionState, StateStore};
use crate::toggle::BinaryToggle;

/// Everything the controller touches for one UI session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub mode: ModeTag,
    /// Primary UI process; the switch waits for this one.
    pub process: String,
    pub helper_processes: Vec<String>,
    pub service: Option<PathBuf>,
    /// Started best-effort when this session wins.
    pub helper_services: Vec<PathBuf>,
    pub toggles: Vec<BinaryToggle>,
}

impl SessionProfile {
    fn processes(&self) -> impl Iterator<Item = &String> {
        iter::once(&self.process).chain(self.helper_processes.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchOptions {
    pub kill_policy: RetryPolicy,
    pub start_policy: RetryPolicy,
    pub restore_on_failure: bool,
}

impl From<&SwitchConfig> for SwitchOptions {
    fn from(config: &SwitchConfig) -> Self {
        Self {
            kill_policy: config.kill_policy(),
            start_policy: config.start_policy(),
            restore_on_failure: config.restore_on_failure,
        }
    }
}

/// Outcome of a completed switch, including non-fatal problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub from: ModeTag,
    pub to: ModeTag,
    /// Processes that survived their verified stop.
    pub kill_failures: Vec<String>,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl SwitchReport {
    fn new(from: &ModeTag, to: &ModeTag) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            kill_failures: Vec::new(),
            warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.kill_failures.is_empty() && self.warnings.is_empty()
    }
}

pub struct SwitchController<T: ProcessTable, S: ServiceControl> {
    session: ExclusiveSession,
    store: StateStore,
    processes: ManagedProcess<T>,
    services: S,
    options: SwitchOptions,
}

impl SwitchController<SystemProcessTable, InitScriptControl> {
    pub fn from_config(config: &ControllerConfig) -> Self {
        SwitchController::new(
            ExclusiveSession::new(config.switch.lock_path.clone()),
            StateStore::new(config.switch.state_path.clone()),
            ManagedProcess::new(SystemProcessTable),
            InitScriptControl::new(config.switch.service_timeout()),
            SwitchOptions::from(&config.switch),
        )
    }
}

impl<T: ProcessTable, S: ServiceControl> SwitchController<T, S> {
    pub fn new(
        session: ExclusiveSession,
        store: StateStore,
        processes: ManagedProcess<T>,
        services: S,
        options: SwitchOptions,
    ) -> Self {
        Self {
            session,
            store,
            processes,
            services,
            options,
        }
    }

    pub fn current_state(&self) -> SessionState {
        self.store.read()
    }

    pub fn is_running(&self, process: &str) -> bool {
        self.processes.is_running_by_name(process)
    }

    /// Replaces `losing` with `winning`.
    ///
    /// Switching to the session that is already active is performed anyway;
    /// the sequence is idempotent.
    pub fn switch(&self, losing: &SessionProfile, winning: &SessionProfile) -> Result<SwitchReport> {
        if losing.mode == winning.mode {
            return Err(LifecycleError::ConfigInvalid(format!(
                "cannot switch session {} to itself",
                winning.mode
            )));
        }

        let started = Instant::now();
        let lock = self.session.acquire()?;
        info!(from = %losing.mode, to = %winning.mode, "Switch started");

        let mut report = SwitchReport::new(&losing.mode, &winning.mode);
        self.retire(losing, &mut report);
        lock.release();

        self.launch(winning, &mut report);

        let mut handle = ManagedProcessHandle::external(winning.process.clone());
        if !self
            .processes
            .wait_until_running(&mut handle, self.options.start_policy)
        {
            error!(
                process = %winning.process,
                attempts = self.options.start_policy.max_attempts,
                "Winning UI never appeared"
            );
            if self.options.restore_on_failure {
                self.restore(losing, winning);
            }
            return Err(LifecycleError::StartVerificationFailed {
                name: winning.process.clone(),
                attempts: self.options.start_policy.max_attempts,
            });
        }

        self.store.write(&winning.mode)?;
        report.elapsed = started.elapsed();
        info!(
            mode = %winning.mode,
            elapsed_ms = report.elapsed.as_millis() as u64,
            warnings = report.warnings.len() + report.kill_failures.len(),
            "Switch complete"
        );
        Ok(report)
    }

    /// Guards, service, then processes. Never fails.
    fn retire(&self, profile: &SessionProfile, report: &mut SwitchReport) {
        for toggle in &profile.toggles {
            if let Err(err) = toggle.disable() {
                warn!(error = %err, "Failed to disable binary");
                report.warnings.push(err.to_string());
            }
        }

        if let Some(service) = &profile.service {
            self.service(service, ServiceVerb::Stop, report);
            self.service(service, ServiceVerb::Disable, report);
        }

        for name in profile.processes() {
            let mut handle = ManagedProcessHandle::external(name.clone());
            if let Err(err) = self
                .processes
                .stop_verified(&mut handle, self.options.kill_policy)
            {
                warn!(error = %err, "Continuing with a process that would not die");
                report.kill_failures.push(name.clone());
            }
        }
    }

    fn launch(&self, profile: &SessionProfile, report: &mut SwitchReport) {
        for toggle in &profile.toggles {
            if let Err(err) = toggle.enable() {
                warn!(error = %err, "Failed to re-enable binary");
                report.warnings.push(err.to_string());
            }
        }

        if let Some(service) = &profile.service {
            self.service(service, ServiceVerb::Enable, report);
            self.service(service, ServiceVerb::Start, report);
        }
        for helper in &profile.helper_services {
            self.service(helper, ServiceVerb::Start, report);
        }
    }

    fn service(&self, service: &Path, verb: ServiceVerb, report: &mut SwitchReport) {
        if let Err(err) = self.services.run(service, verb) {
            warn!(error = %err, "Service command failed; continuing");
            report.warnings.push(err.to_string());
        }
    }

    /// Puts `losing` back after `winning` failed to come up.
    fn restore(&self, losing: &SessionProfile, winning: &SessionProfile) -> bool {
        let lock = match self.session.try_acquire() {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                warn!("Another switch holds the lock; skipping restore");
                return false;
            }
            Err(err) => {
                warn!(error = %err, "Could not take the lock for restore");
                return false;
            }
        };
        warn!(mode = %losing.mode, "Restoring previous session");

        let mut report = SwitchReport::new(&winning.mode, &losing.mode);
        self.retire(winning, &mut report);
        lock.release();
        self.launch(losing, &mut report);

        let mut handle = ManagedProcessHandle::external(losing.process.clone());
        let restored = self
            .processes
            .wait_until_running(&mut handle, self.options.start_policy);
        if restored {
            info!(mode = %losing.mode, "Previous session restored");
        } else {
            error!(mode = %losing.mode, "Restore failed; no UI is confirmed running");
        }
        restored
    }
}

/// Mode a `toggle` invocation should switch to.
///
/// Uses the persisted mode when it names a configured session. Otherwise the
/// current session is whichever primary process is running, falling back to
/// the first configured one.
pub fn toggle_target(
    config: &ControllerConfig,
    state: &SessionState,
    is_running: impl Fn(&str) -> bool,
) -> Result<ModeTag> {
    let modes = config.modes();
    let persisted = state
        .mode()
        .filter(|mode| config.sessions.contains_key(mode.as_str()))
        .cloned();

    let current = match persisted {
        Some(mode) => mode,
        None => {
            let running = modes.iter().find(|mode| {
                config
                    .sessions
                    .get(mode.as_str())
                    .map(|session| is_running(&session.process))
                    .unwrap_or(false)
            });
            match running.or_else(|| modes.first()) {
                Some(mode) => {
                    debug!(mode = %mode, "Inferred current session");
                    mode.clone()
                }
                None => {
                    return Err(LifecycleError::ConfigInvalid(
                        "no sessions configured".to_string(),
                    ))
                }
            }
        }
    };

    Ok(config.counterpart(&current)?.mode)
}
