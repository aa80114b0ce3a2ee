//! Process-table access for name-based lookups and forced kills.

use std::io;

use sysinfo::{ProcessRefreshKind, ProcessStatus, System};

/// Kernel limit on `comm` length (TASK_COMM_LEN - 1).
const COMM_MAX_LEN: usize = 15;

/// Name lookup and signal delivery against the host process table.
///
/// Name matching is `killall` semantics: any process with that name is
/// targeted, including an unrelated process that happens to share it.
pub trait ProcessTable {
    /// PIDs of live (non-zombie) processes named `name`.
    fn find_by_name(&self, name: &str) -> Vec<u32>;

    /// Sends SIGKILL. A process that is already gone is not an error.
    fn kill(&self, pid: u32) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn find_by_name(&self, name: &str) -> Vec<u32> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessRefreshKind::new());

        let own_pid = std::process::id();
        let mut pids: Vec<u32> = sys
            .processes()
            .values()
            .filter(|process| process.status() != ProcessStatus::Zombie)
            .filter(|process| name_matches(process.name(), name))
            .map(|process| process.pid().as_u32())
            .filter(|pid| *pid != own_pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        send_kill(pid)
    }
}

/// Compares a process-table name with a configured name, allowing for the
/// kernel truncating long names to 15 bytes.
fn name_matches(actual: &str, wanted: &str) -> bool {
    if actual == wanted {
        return true;
    }
    wanted.len() > COMM_MAX_LEN
        && wanted
            .get(..COMM_MAX_LEN)
            .map(|truncated| truncated == actual)
            .unwrap_or(false)
}

pub(crate) fn send_kill(pid: u32) -> io::Result<()> {
    let raw_pid = libc::pid_t::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {}", pid)))?;

    // SAFETY: kill(2) with a positive pid signals exactly that process; pid 0
    // and negative values (process groups) are rejected above.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(raw_pid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Signal-0 liveness probe.
pub fn is_pid_alive(pid: u32) -> bool {
    let Some(raw_pid) = libc::pid_t::try_from(pid).ok().filter(|raw| *raw > 0) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence/permission check.
    #[allow(unsafe_code)]
    unsafe {
        libc::kill(raw_pid, 0) == 0
    }
}
