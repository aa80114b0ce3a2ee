//! `ui-switch status`: persisted mode plus which UI processes are up.

use serde::Serialize;

use lifecycle_core::{ControllerConfig, ProcessTable, ServiceControl, SwitchController};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Persisted mode tag, or `unknown`.
    pub mode: String,
    pub sessions: Vec<SessionStatus>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub mode: String,
    pub process: String,
    pub running: bool,
    pub binary_disabled: bool,
}

pub fn collect<T: ProcessTable, S: ServiceControl>(
    config: &ControllerConfig,
    controller: &SwitchController<T, S>,
) -> StatusReport {
    let state = controller.current_state();
    let sessions = config
        .modes()
        .into_iter()
        .filter_map(|mode| config.session(&mode).ok())
        .map(|profile| SessionStatus {
            running: controller.is_running(&profile.process),
            binary_disabled: profile.toggles.iter().any(|toggle| toggle.is_disabled()),
            mode: profile.mode.to_string(),
            process: profile.process,
        })
        .collect();

    StatusReport {
        mode: state.to_string(),
        sessions,
    }
}

pub fn render_text(report: &StatusReport) -> String {
    let mut out = format!("mode: {}\n", report.mode);
    for session in &report.sessions {
        out.push_str(&format!(
            "{:<10} {:<16} {}{}\n",
            session.mode,
            session.process,
            if session.running { "running" } else { "stopped" },
            if session.binary_disabled { " (disabled)" } else { "" },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lists_each_session() {
        let report = StatusReport {
            mode: "guppy".to_string(),
            sessions: vec![
                SessionStatus {
                    mode: "creality".to_string(),
                    process: "display-server".to_string(),
                    running: false,
                    binary_disabled: true,
                },
                SessionStatus {
                    mode: "guppy".to_string(),
                    process: "guppyscreen".to_string(),
                    running: true,
                    binary_disabled: false,
                },
            ],
        };

        let text = render_text(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "mode: guppy");
        assert!(lines[1].starts_with("creality"));
        assert!(lines[1].ends_with("stopped (disabled)"));
        assert!(lines[2].ends_with("running"));
    }

    fn temp_config(dir: &std::path::Path) -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.switch.state_path = dir.join("ui.mode");
        config.switch.lock_path = dir.join("switch.lock");
        config
    }

    #[test]
    fn collect_reports_persisted_mode_or_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path());
        let controller = SwitchController::from_config(&config);

        assert_eq!(collect(&config, &controller).mode, "unknown");

        fs_err::write(&config.switch.state_path, "guppy\n").unwrap();
        let report = collect(&config, &controller);
        assert_eq!(report.mode, "guppy");
        let modes: Vec<&str> = report.sessions.iter().map(|s| s.mode.as_str()).collect();
        assert_eq!(modes, vec!["creality", "guppy"]);
    }

    #[test]
    fn json_uses_unknown_sentinel() {
        let report = StatusReport {
            mode: "unknown".to_string(),
            sessions: Vec::new(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "unknown");
        assert!(json["sessions"].as_array().unwrap().is_empty());
    }
}
