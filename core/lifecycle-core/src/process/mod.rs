//! Managed process lifecycle: start, liveness, verified stop, verified start.
//!
//! # Ownership
//!
//! A [`ManagedProcessHandle`] is either *owned* (this controller spawned the
//! process, holds its [`Child`], and is responsible for reaping it) or
//! *external* (only a name is known, e.g. a UI binary relaunched by a
//! watchdog). Owned handles are always targeted by pid. External handles use
//! name lookup through a [`ProcessTable`], which will also hit an unrelated
//! process that shares the name.
//!
//! # Verified Transitions
//!
//! Targets can be relaunched behind our back, so a kill is never assumed to
//! have worked: [`ManagedProcess::stop_verified`] re-checks liveness after
//! every SIGKILL round and gives up after a bounded number of attempts.

mod table;

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{LifecycleError, Result};

pub use table::{is_pid_alive, ProcessTable, SystemProcessTable};

/// Bound for a polling loop: at most `max_attempts` checks, `poll_interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            max_attempts,
            poll_interval,
        }
    }

    /// Upper bound on time spent sleeping under this policy.
    pub fn budget(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

#[derive(Debug)]
enum Ownership {
    Owned {
        child: Child,
        exit: Option<ExitStatus>,
    },
    External,
}

/// A process tracked by name, optionally with a held child handle.
#[derive(Debug)]
pub struct ManagedProcessHandle {
    name: String,
    ownership: Ownership,
}

impl ManagedProcessHandle {
    /// Name-only handle for a process someone else launched.
    pub fn external(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ownership: Ownership::External,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PID of an owned child, `None` for external handles.
    pub fn pid(&self) -> Option<u32> {
        match &self.ownership {
            Ownership::Owned { child, .. } => Some(child.id()),
            Ownership::External => None,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Owned { .. })
    }

    /// Exit status of an owned child that has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match &self.ownership {
            Ownership::Owned { exit, .. } => *exit,
            Ownership::External => None,
        }
    }
}

/// Lifecycle operations over a process table.
#[derive(Debug, Clone, Default)]
pub struct ManagedProcess<T: ProcessTable> {
    table: T,
}

impl<T: ProcessTable> ManagedProcess<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Spawns `command` in its own process group and returns an owned handle.
    ///
    /// Does not wait for the process to become ready.
    pub fn start(&self, name: &str, command: &[String]) -> Result<ManagedProcessHandle> {
        let rendered = command.join(" ");
        let (program, args) = command.split_first().ok_or_else(|| LifecycleError::SpawnFailed {
            command: rendered.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|source| LifecycleError::SpawnFailed {
                command: rendered.clone(),
                source,
            })?;

        info!(name, pid = child.id(), command = %rendered, "Process started");
        Ok(ManagedProcessHandle {
            name: name.to_string(),
            ownership: Ownership::Owned { child, exit: None },
        })
    }

    /// True while at least one process matches the handle.
    ///
    /// Reaps an owned child as a side effect once it has exited.
    pub fn is_running(&self, handle: &mut ManagedProcessHandle) -> bool {
        match &mut handle.ownership {
            Ownership::Owned { exit: Some(_), .. } => false,
            Ownership::Owned { child, exit } => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(name = %handle.name, pid = child.id(), %status, "Owned process exited");
                    *exit = Some(status);
                    false
                }
                Err(err) => {
                    warn!(name = %handle.name, error = %err, "Failed to poll owned process");
                    is_pid_alive(child.id())
                }
            },
            Ownership::External => self.is_running_by_name(&handle.name),
        }
    }

    pub fn is_running_by_name(&self, name: &str) -> bool {
        !self.table.find_by_name(name).is_empty()
    }

    fn kill_round(&self, handle: &mut ManagedProcessHandle) {
        match &mut handle.ownership {
            Ownership::Owned { child, .. } => {
                if let Err(err) = child.kill() {
                    debug!(name = %handle.name, error = %err, "Kill of owned process failed");
                }
            }
            Ownership::External => {
                for pid in self.table.find_by_name(&handle.name) {
                    if let Err(err) = self.table.kill(pid) {
                        warn!(name = %handle.name, pid, error = %err, "Failed to signal process");
                    }
                }
            }
        }
    }

    /// Force-kills every matching process and confirms it is gone.
    ///
    /// Returns `KillVerificationFailed` if a match survives the last attempt.
    /// No-op success when nothing matches.
    pub fn stop_verified(
        &self,
        handle: &mut ManagedProcessHandle,
        policy: RetryPolicy,
    ) -> Result<()> {
        for attempt in 1..=policy.max_attempts {
            if !self.is_running(handle) {
                if attempt > 1 {
                    info!(name = %handle.name, attempts = attempt - 1, "Process stopped");
                }
                return Ok(());
            }
            debug!(name = %handle.name, attempt, "Sending SIGKILL");
            self.kill_round(handle);
            thread::sleep(policy.poll_interval);
        }

        if self.is_running(handle) {
            return Err(LifecycleError::KillVerificationFailed {
                name: handle.name.clone(),
                attempts: policy.max_attempts,
            });
        }
        info!(name = %handle.name, attempts = policy.max_attempts, "Process stopped");
        Ok(())
    }

    /// Polls until the process appears; false once attempts are exhausted.
    pub fn wait_until_running(&self, handle: &mut ManagedProcessHandle, policy: RetryPolicy) -> bool {
        for attempt in 1..=policy.max_attempts {
            if self.is_running(handle) {
                debug!(name = %handle.name, attempt, "Process is running");
                return true;
            }
            thread::sleep(policy.poll_interval);
        }
        self.is_running(handle)
    }
}
