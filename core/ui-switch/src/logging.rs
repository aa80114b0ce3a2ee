//! Logging for ui-switch: stderr plus an append-only file under the configured log dir.
//!
//! Switches are usually fired from a gesture daemon or a gcode macro whose
//! stderr goes nowhere, so the file is what gets read afterwards. If the
//! directory cannot be created the file layer is dropped and stderr remains.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_NAME: &str = "ui-switch.log";

/// Keep the returned guard alive until exit so buffered lines reach the file.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir.and_then(open_log_file) {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var("LIFECYCLE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn open_log_file(dir: &Path) -> Option<fs_err::File> {
    fs_err::create_dir_all(dir).ok()?;
    fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn log_file_is_created_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");

        writeln!(open_log_file(&logs).expect("first open"), "first").unwrap();
        writeln!(open_log_file(&logs).expect("second open"), "second").unwrap();

        let content = fs_err::read_to_string(logs.join(LOG_FILE_NAME)).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn unusable_log_dir_yields_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs_err::write(&blocker, "").unwrap();
        assert!(open_log_file(&blocker.join("logs")).is_none());
    }
}
