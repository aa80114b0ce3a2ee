//! Device-presence-driven bridge supervision.
//!
//! ## State Machine
//!
//! ```text
//! Present + Stopped → spawn bridge        (Running)
//! Absent  + Running → verified stop,      (Stopped)
//!                     remove device file
//! Present + Running → nothing
//! Absent  + Stopped → nothing
//! ```
//!
//! One presence check and at most one transition per tick. A bridge that
//! exits by itself is reaped on the next tick and, if the device is still
//! there, respawned subject to [`RespawnBackoff`].
//!
//! The held child handle is the only record of ownership. It is set on
//! spawn and cleared after a verified stop or an observed exit; whatever
//! path ends the loop (cancellation, return, unwinding) stops a bridge that
//! is still held.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffConfig, RespawnBackoff};
use crate::cancel::CancellationToken;
use crate::config::BridgeConfig;
use crate::detector::{CommandEnumerator, DeviceEnumerator, DeviceIdentity, ResourceDetector};
use crate::process::{
    ManagedProcess, ManagedProcessHandle, ProcessTable, RetryPolicy, SystemProcessTable,
};

/// What to run while the device is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSpec {
    pub name: String,
    pub command: Vec<String>,
    /// Device file the bridge exposes; removed defensively after a stop.
    pub device_artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub poll_interval: Duration,
    pub stop_policy: RetryPolicy,
    pub backoff: BackoffConfig,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            stop_policy: RetryPolicy::new(10, Duration::from_millis(100)),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Running,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Started { pid: u32 },
    Stopped,
    /// Bridge exited on its own and the device is gone.
    Exited,
    StopFailed,
    SpawnFailed,
    SpawnDeferred { secs: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub spawns: u32,
    pub stops: u32,
    pub exits: u32,
    pub spawn_failures: u32,
    pub stop_failures: u32,
}

pub struct SupervisorLoop<E: DeviceEnumerator, T: ProcessTable> {
    detector: ResourceDetector<E>,
    identity: DeviceIdentity,
    processes: ManagedProcess<T>,
    bridge: BridgeSpec,
    options: SupervisorOptions,
    backoff: RespawnBackoff,
    child: Option<ManagedProcessHandle>,
    deferring: bool,
    stats: SupervisorStats,
}

impl SupervisorLoop<CommandEnumerator, SystemProcessTable> {
    pub fn from_config(config: &BridgeConfig) -> Self {
        let options = SupervisorOptions {
            poll_interval: config.poll_interval(),
            stop_policy: config.stop_policy(),
            backoff: BackoffConfig {
                window_secs: config.respawn_window_secs,
                max_starts: config.respawn_max_starts,
                step_secs: config.respawn_backoff_step_secs,
                max_secs: config.respawn_backoff_max_secs,
            },
        };
        let bridge = BridgeSpec {
            name: config.process_name(),
            command: config.command.clone(),
            device_artifact: config.device_artifact.clone(),
        };
        SupervisorLoop::new(
            ResourceDetector::new(
                CommandEnumerator::new(config.enumerate_command.clone())
                    .with_timeout(config.enumerate_timeout()),
            ),
            config.identity(),
            ManagedProcess::new(SystemProcessTable),
            bridge,
            options,
        )
    }
}

impl<E: DeviceEnumerator, T: ProcessTable> SupervisorLoop<E, T> {
    pub fn new(
        detector: ResourceDetector<E>,
        identity: DeviceIdentity,
        processes: ManagedProcess<T>,
        bridge: BridgeSpec,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            detector,
            identity,
            processes,
            bridge,
            backoff: RespawnBackoff::new(options.backoff),
            options,
            child: None,
            deferring: false,
            stats: SupervisorStats::default(),
        }
    }

    pub fn state(&self) -> BridgeState {
        if self.child.is_some() {
            BridgeState::Running
        } else {
            BridgeState::Stopped
        }
    }

    pub fn bridge_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(ManagedProcessHandle::pid)
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Polls until `cancel` fires, then stops the bridge once.
    pub fn run(&mut self, cancel: &CancellationToken) {
        info!(
            device = %self.identity,
            bridge = %self.bridge.name,
            interval_ms = self.options.poll_interval.as_millis() as u64,
            "Bridge supervisor running"
        );

        while !cancel.is_cancelled() {
            let transition = self.tick();
            debug!(?transition, "Supervisor tick");
            if cancel.sleep(self.options.poll_interval) {
                break;
            }
        }

        info!("Termination requested; stopping bridge");
        self.ensure_stopped();
    }

    /// One presence check and at most one transition.
    pub fn tick(&mut self) -> Transition {
        let present = self.detector.is_present(&self.identity);
        self.reconcile(present)
    }

    /// Drives the bridge toward `present`.
    pub fn reconcile(&mut self, present: bool) -> Transition {
        let exited = self.reap_exited();

        match (present, self.state()) {
            (true, BridgeState::Stopped) => self.ensure_running(),
            (false, BridgeState::Running) => {
                if self.ensure_stopped() {
                    self.backoff.reset();
                    Transition::Stopped
                } else {
                    Transition::StopFailed
                }
            }
            (false, BridgeState::Stopped) if exited => {
                self.backoff.reset();
                Transition::Exited
            }
            _ => Transition::Unchanged,
        }
    }

    /// Stops a held bridge and removes its device file.
    ///
    /// Returns true if a bridge was stopped. No-op when nothing is held. On a
    /// failed stop the handle is kept so the next tick tries again.
    pub fn ensure_stopped(&mut self) -> bool {
        let Some(mut handle) = self.child.take() else {
            return false;
        };

        if let Err(err) = self
            .processes
            .stop_verified(&mut handle, self.options.stop_policy)
        {
            warn!(error = %err, pid = ?handle.pid(), "Bridge did not stop; will retry");
            self.stats.stop_failures += 1;
            self.child = Some(handle);
            return false;
        }

        self.stats.stops += 1;
        self.remove_artifact();
        info!(bridge = %self.bridge.name, "Bridge stopped");
        true
    }

    fn ensure_running(&mut self) -> Transition {
        let now = Utc::now();
        if let Some(secs) = self.backoff.delay_at(now) {
            if !self.deferring {
                warn!(
                    recent_starts = self.backoff.recent_starts(),
                    backoff_secs = secs,
                    "Bridge respawn backoff engaged"
                );
                self.deferring = true;
            }
            return Transition::SpawnDeferred { secs };
        }
        self.deferring = false;

        self.backoff.record_start(now);
        match self.processes.start(&self.bridge.name, &self.bridge.command) {
            Ok(handle) => {
                let pid = handle.pid().unwrap_or_default();
                self.child = Some(handle);
                self.stats.spawns += 1;
                info!(device = %self.identity, pid, "Device present; bridge started");
                Transition::Started { pid }
            }
            Err(err) => {
                warn!(error = %err, "Failed to start bridge; retrying next tick");
                self.stats.spawn_failures += 1;
                Transition::SpawnFailed
            }
        }
    }

    fn reap_exited(&mut self) -> bool {
        let Some(handle) = self.child.as_mut() else {
            return false;
        };
        if self.processes.is_running(handle) {
            return false;
        }

        warn!(
            bridge = %self.bridge.name,
            status = ?handle.exit_status(),
            "Bridge exited on its own"
        );
        self.child = None;
        self.stats.exits += 1;
        self.remove_artifact();
        true
    }

    fn remove_artifact(&self) {
        let Some(path) = &self.bridge.device_artifact else {
            return;
        };
        match fs_err::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed bridge device file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, "Failed to remove bridge device file"),
        }
    }
}

impl<E: DeviceEnumerator, T: ProcessTable> Drop for SupervisorLoop<E, T> {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!("Supervisor dropped with a running bridge; stopping it");
            self.ensure_stopped();
        }
    }
}
