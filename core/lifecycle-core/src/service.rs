//! Service-control verbs for UI sessions.
//!
//! UI processes are started and stopped through their init scripts
//! (`/etc/init.d/<name> start`), never invoked directly.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, info};

use crate::command::status_within;
use crate::error::{LifecycleError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceVerb {
    Enable,
    Disable,
    Start,
    Stop,
}

impl ServiceVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceVerb::Enable => "enable",
            ServiceVerb::Disable => "disable",
            ServiceVerb::Start => "start",
            ServiceVerb::Stop => "stop",
        }
    }
}

pub trait ServiceControl {
    fn run(&self, service: &Path, verb: ServiceVerb) -> Result<()>;
}

/// Runs `<script> <verb>`, killing it after `timeout`.
///
/// Stdio is detached: a script that backgrounds a daemon would otherwise
/// keep captured pipes open and block us.
#[derive(Debug, Clone, Copy)]
pub struct InitScriptControl {
    timeout: Duration,
}

impl InitScriptControl {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for InitScriptControl {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ServiceControl for InitScriptControl {
    fn run(&self, service: &Path, verb: ServiceVerb) -> Result<()> {
        let command = format!("{} {}", service.display(), verb.as_str());
        if !service.exists() {
            return Err(LifecycleError::CommandFailed {
                command,
                details: "service script not found".to_string(),
            });
        }

        debug!(command = %command, "Running service command");
        let status = status_within(
            Command::new(service)
                .arg(verb.as_str())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null()),
            self.timeout,
        )
        .map_err(|err| LifecycleError::CommandFailed {
            command: command.clone(),
            details: err.to_string(),
        })?
        .ok_or_else(|| LifecycleError::CommandFailed {
            command: command.clone(),
            details: format!("timed out after {:?}", self.timeout),
        })?;

        if !status.success() {
            return Err(LifecycleError::CommandFailed {
                command,
                details: format!("exit status {}", status),
            });
        }
        info!(command = %command, "CMD OK");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs_err::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs_err::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn runs_script_with_verb() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("verbs.log");
        let script = write_script(
            dir.path(),
            "guppyscreen",
            &format!("echo \"$1\" >> {}", log.display()),
        );

        let control = InitScriptControl::default();
        control.run(&script, ServiceVerb::Enable).unwrap();
        control.run(&script, ServiceVerb::Start).unwrap();
        assert_eq!(fs_err::read_to_string(&log).unwrap(), "enable\nstart\n");
    }

    #[test]
    fn failing_script_is_command_error() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "broken", "exit 3");
        let err = InitScriptControl::default()
            .run(&script, ServiceVerb::Stop)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::CommandFailed { .. }));
    }

    #[test]
    fn hung_script_times_out() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "hung", "exec sleep 30");
        let started = std::time::Instant::now();

        let err = InitScriptControl::new(Duration::from_millis(200))
            .run(&script, ServiceVerb::Stop)
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_script_is_command_error() {
        let err = InitScriptControl::default()
            .run(Path::new("/nonexistent/init.d/ghost"), ServiceVerb::Start)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
