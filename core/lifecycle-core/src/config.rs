//! Controller configuration.
//!
//! Loaded from a TOML file (default `/etc/lifecycle-controller.toml`, or the
//! path in `LIFECYCLE_CONFIG`). A missing file yields defaults for the stock
//! printer layout; a malformed file is an error.
//!
//! ```toml
//! [bridge]
//! vendor_id = "1d50"
//! product_id = "614e"
//! command = ["/mnt/UDISK/bin/usb_bridge"]
//!
//! [switch]
//! state_path = "/tmp/ui-session.mode"
//!
//! [sessions.guppy]
//! process = "guppyscreen"
//! service = "/etc/init.d/guppyscreen"
//!
//! [[sessions.guppy.toggles]]
//! active = "/mnt/UDISK/root/guppyscreen/guppyscreen"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::detector::DeviceIdentity;
use crate::error::{LifecycleError, Result};
use crate::process::RetryPolicy;
use crate::session::ModeTag;
use crate::switch::SessionProfile;
use crate::toggle::BinaryToggle;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/lifecycle-controller.toml";
pub const CONFIG_PATH_ENV: &str = "LIFECYCLE_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub bridge: BridgeConfig,
    pub switch: SwitchConfig,
    pub sessions: BTreeMap<String, SessionConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub vendor_id: String,
    pub product_id: String,
    /// Command whose output lists attached USB devices.
    pub enumerate_command: Vec<String>,
    /// Enumeration overrunning this is killed and counted as absence.
    pub enumerate_timeout_ms: u64,
    /// Bridge executable plus arguments.
    pub command: Vec<String>,
    /// Name used in log lines; defaults to the executable's file name.
    pub process_name: Option<String>,
    /// Device file the bridge creates while running.
    pub device_artifact: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub stop_attempts: u32,
    pub stop_interval_ms: u64,
    pub respawn_window_secs: i64,
    pub respawn_max_starts: usize,
    pub respawn_backoff_step_secs: u64,
    pub respawn_backoff_max_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            vendor_id: "1d50".to_string(),
            product_id: "614e".to_string(),
            enumerate_command: vec!["lsusb".to_string()],
            enumerate_timeout_ms: 5_000,
            command: vec!["/mnt/UDISK/bin/usb_bridge".to_string()],
            process_name: None,
            device_artifact: Some(PathBuf::from("/dev/ttyACM0")),
            poll_interval_ms: 2_000,
            stop_attempts: 10,
            stop_interval_ms: 100,
            respawn_window_secs: 120,
            respawn_max_starts: 3,
            respawn_backoff_step_secs: 10,
            respawn_backoff_max_secs: 60,
        }
    }
}

impl BridgeConfig {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(&self.vendor_id, &self.product_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn enumerate_timeout(&self) -> Duration {
        Duration::from_millis(self.enumerate_timeout_ms)
    }

    pub fn stop_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.stop_attempts, Duration::from_millis(self.stop_interval_ms))
    }

    pub fn process_name(&self) -> String {
        if let Some(name) = &self.process_name {
            return name.clone();
        }
        self.command
            .first()
            .and_then(|program| Path::new(program).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bridge".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwitchConfig {
    pub lock_path: PathBuf,
    pub state_path: PathBuf,
    /// Directory for the ui-switch log file. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub kill_attempts: u32,
    pub kill_interval_ms: u64,
    pub start_attempts: u32,
    pub start_interval_ms: u64,
    /// Limit on a single init-script invocation.
    pub service_timeout_ms: u64,
    pub restore_on_failure: bool,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            lock_path: PathBuf::from("/tmp/ui-switch.lock"),
            state_path: PathBuf::from("/tmp/ui-session.mode"),
            log_dir: Some(PathBuf::from("/tmp/ui-switch-logs")),
            kill_attempts: 10,
            kill_interval_ms: 100,
            start_attempts: 20,
            start_interval_ms: 500,
            service_timeout_ms: 30_000,
            restore_on_failure: true,
        }
    }
}

impl SwitchConfig {
    pub fn kill_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.kill_attempts, Duration::from_millis(self.kill_interval_ms))
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    pub fn start_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.start_attempts,
            Duration::from_millis(self.start_interval_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Primary UI process name.
    pub process: String,
    #[serde(default)]
    pub helper_processes: Vec<String>,
    /// Init script accepting enable/disable/start/stop.
    pub service: Option<PathBuf>,
    #[serde(default)]
    pub helper_services: Vec<PathBuf>,
    #[serde(default)]
    pub toggles: Vec<ToggleConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleConfig {
    pub active: PathBuf,
    /// Defaults to `<active>.disabled`.
    pub disabled: Option<PathBuf>,
}

impl ToggleConfig {
    pub fn to_toggle(&self) -> BinaryToggle {
        match &self.disabled {
            Some(disabled) => BinaryToggle::new(self.active.clone(), disabled.clone()),
            None => BinaryToggle::with_default_suffix(self.active.clone()),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let gesture_daemon = PathBuf::from("/etc/init.d/gesture-daemon");
        let mut sessions = BTreeMap::new();
        sessions.insert(
            "creality".to_string(),
            SessionConfig {
                process: "display-server".to_string(),
                helper_processes: vec!["boot-play".to_string()],
                service: Some(PathBuf::from("/etc/init.d/display-server")),
                helper_services: vec![gesture_daemon.clone()],
                toggles: vec![
                    ToggleConfig {
                        active: PathBuf::from("/usr/bin/display-server"),
                        disabled: None,
                    },
                    ToggleConfig {
                        active: PathBuf::from("/sbin/boot-play"),
                        disabled: None,
                    },
                ],
            },
        );
        sessions.insert(
            "guppy".to_string(),
            SessionConfig {
                process: "guppyscreen".to_string(),
                helper_processes: Vec::new(),
                service: Some(PathBuf::from("/etc/init.d/guppyscreen")),
                helper_services: vec![gesture_daemon],
                toggles: vec![ToggleConfig {
                    active: PathBuf::from("/mnt/UDISK/root/guppyscreen/guppyscreen"),
                    disabled: None,
                }],
            },
        );
        Self {
            bridge: BridgeConfig::default(),
            switch: SwitchConfig::default(),
            sessions,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        let bridge = &self.bridge;
        if !is_usb_id(&bridge.vendor_id) || !is_usb_id(&bridge.product_id) {
            return Err(LifecycleError::ConfigInvalid(format!(
                "bridge identity must be two 4-digit hex ids, got {}:{}",
                bridge.vendor_id, bridge.product_id
            )));
        }
        if bridge.command.is_empty() || bridge.enumerate_command.is_empty() {
            return Err(LifecycleError::ConfigInvalid(
                "bridge command and enumerate_command must not be empty".to_string(),
            ));
        }
        if bridge.stop_attempts == 0
            || self.switch.kill_attempts == 0
            || self.switch.start_attempts == 0
        {
            return Err(LifecycleError::ConfigInvalid(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if bridge.poll_interval_ms == 0 {
            return Err(LifecycleError::ConfigInvalid(
                "bridge poll_interval_ms must be positive".to_string(),
            ));
        }
        if bridge.enumerate_timeout_ms == 0 || self.switch.service_timeout_ms == 0 {
            return Err(LifecycleError::ConfigInvalid(
                "command timeouts must be positive".to_string(),
            ));
        }
        if self.sessions.len() != 2 {
            return Err(LifecycleError::ConfigInvalid(format!(
                "exactly two sessions are required, found {}",
                self.sessions.len()
            )));
        }
        for (tag, session) in &self.sessions {
            ModeTag::parse(tag)?;
            if session.process.trim().is_empty() {
                return Err(LifecycleError::ConfigInvalid(format!(
                    "session {} has an empty process name",
                    tag
                )));
            }
        }
        Ok(())
    }

    /// Mode tags of the configured sessions, in sorted order.
    pub fn modes(&self) -> Vec<ModeTag> {
        self.sessions
            .keys()
            .filter_map(|tag| ModeTag::parse(tag).ok())
            .collect()
    }

    pub fn session(&self, mode: &ModeTag) -> Result<SessionProfile> {
        let config = self
            .sessions
            .get(mode.as_str())
            .ok_or_else(|| LifecycleError::UnknownMode(mode.to_string()))?;
        Ok(SessionProfile {
            mode: mode.clone(),
            process: config.process.clone(),
            helper_processes: config.helper_processes.clone(),
            service: config.service.clone(),
            helper_services: config.helper_services.clone(),
            toggles: config.toggles.iter().map(ToggleConfig::to_toggle).collect(),
        })
    }

    /// The session that loses when `mode` wins.
    pub fn counterpart(&self, mode: &ModeTag) -> Result<SessionProfile> {
        if !self.sessions.contains_key(mode.as_str()) {
            return Err(LifecycleError::UnknownMode(mode.to_string()));
        }
        let other = self
            .modes()
            .into_iter()
            .find(|candidate| candidate != mode)
            .ok_or_else(|| {
                LifecycleError::ConfigInvalid(format!("no session to switch away from {}", mode))
            })?;
        self.session(&other)
    }
}

fn is_usb_id(value: &str) -> bool {
    value.len() == 4 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Resolves the config path: explicit argument, then `LIFECYCLE_CONFIG`, then the default.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<ControllerConfig> {
    let config_path = resolve_config_path(path);

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "Config file missing; using defaults");
        return Ok(ControllerConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| LifecycleError::io("Failed to read config", err))?;
    let config = toml::from_str::<ControllerConfig>(&content).map_err(|err| {
        LifecycleError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        }
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ControllerConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.bridge.process_name(), "usb_bridge");
        assert_eq!(config.bridge.identity().token(), "1d50:614e");
        assert_eq!(config.modes().len(), 2);
    }

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn load_config_parses_bridge_and_sessions() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("controller.toml");
        fs_err::write(
            &path,
            r#"
[bridge]
vendor_id = "04D8"
product_id = "00dd"
command = ["/opt/bridge", "--quiet"]
device_artifact = "/tmp/bridge-tty"
poll_interval_ms = 500

[switch]
state_path = "/run/ui.mode"
restore_on_failure = false

[sessions.alpha]
process = "alpha"
helper_processes = ["alpha-helper"]

[[sessions.alpha.toggles]]
active = "/usr/bin/alpha"

[sessions.beta]
process = "beta"
service = "/etc/init.d/beta"

[[sessions.beta.toggles]]
active = "/usr/bin/beta"
disabled = "/usr/bin/beta.off"
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.bridge.identity().token(), "04d8:00dd");
        assert_eq!(config.bridge.process_name(), "bridge");
        assert_eq!(config.bridge.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.switch.state_path, PathBuf::from("/run/ui.mode"));
        assert!(!config.switch.restore_on_failure);
        assert_eq!(config.switch.kill_attempts, 10);

        let beta = ModeTag::parse("beta").unwrap();
        let profile = config.session(&beta).expect("beta profile");
        assert_eq!(profile.toggles[0].disabled_path(), Path::new("/usr/bin/beta.off"));

        let loser = config.counterpart(&beta).expect("counterpart");
        assert_eq!(loser.mode.as_str(), "alpha");
        assert_eq!(loser.helper_processes, vec!["alpha-helper".to_string()]);
        assert_eq!(
            loser.toggles[0].disabled_path(),
            Path::new("/usr/bin/alpha.disabled")
        );
    }

    #[test]
    fn load_config_rejects_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("broken.toml");
        fs_err::write(&path, "[bridge\nvendor_id = ").expect("write config");

        let err = load_config(Some(path)).unwrap_err();
        assert!(matches!(err, LifecycleError::ConfigMalformed { .. }));
    }

    #[test]
    fn validate_requires_exactly_two_sessions() {
        let mut config = ControllerConfig::default();
        config.sessions.remove("guppy");
        assert!(matches!(
            config.validate(),
            Err(LifecycleError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_usb_ids() {
        let mut config = ControllerConfig::default();
        config.bridge.vendor_id = "xyz".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_creality_disables_every_process_it_kills() {
        let config = ControllerConfig::default();
        let creality = config
            .session(&ModeTag::parse("creality").unwrap())
            .expect("creality profile");

        let guarded: Vec<_> = creality
            .toggles
            .iter()
            .map(|toggle| toggle.active_path().to_path_buf())
            .collect();
        assert_eq!(
            guarded,
            vec![
                PathBuf::from("/usr/bin/display-server"),
                PathBuf::from("/sbin/boot-play"),
            ]
        );
        for helper in &creality.helper_processes {
            assert!(
                guarded.iter().any(|path| path.file_name() == Some(std::ffi::OsStr::new(helper))),
                "{} is killed but has no toggle",
                helper
            );
        }
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = ControllerConfig::default();
        config.switch.service_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(LifecycleError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn counterpart_of_unknown_mode_is_an_error() {
        let config = ControllerConfig::default();
        let mode = ModeTag::parse("klipperscreen").unwrap();
        assert!(matches!(
            config.counterpart(&mode),
            Err(LifecycleError::UnknownMode(_))
        ));
    }
}
