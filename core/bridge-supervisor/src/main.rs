//! bridge-supervisor: keeps the USB bridge running exactly while its device is attached.
//!
//! Polls the device listing every tick, spawns the bridge on attach and
//! force-stops it (removing its device file) on detach. SIGINT, SIGTERM and
//! SIGHUP end the loop after one final stop; the exit status is then 0.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lifecycle_core::{load_config, resolve_config_path, CancellationToken, SupervisorLoop};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bridge-supervisor")]
#[command(about = "Runs the USB bridge while its device is present")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $LIFECYCLE_CONFIG, then /etc/lifecycle-controller.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the presence poll interval
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config);
    let mut config = match load_config(Some(config_path.clone())) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, path = %config_path.display(), "Failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(interval) = cli.poll_interval_ms.filter(|ms| *ms > 0) {
        config.bridge.poll_interval_ms = interval;
    }

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        error!(error = %err, "Failed to install signal handler");
        std::process::exit(1);
    }

    info!(
        config = %config_path.display(),
        poll_interval = ?Duration::from_millis(config.bridge.poll_interval_ms),
        "Bridge supervisor started"
    );

    let mut supervisor = SupervisorLoop::from_config(&config.bridge);
    supervisor.run(&cancel);

    let stats = supervisor.stats();
    info!(
        spawns = stats.spawns,
        stops = stats.stops,
        exits = stats.exits,
        "Bridge supervisor exiting"
    );
}

fn init_logging() {
    let debug_enabled = env::var("LIFECYCLE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
