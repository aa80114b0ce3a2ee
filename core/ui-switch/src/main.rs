//! ui-switch: one-shot switch between the two printer touchscreen UIs.
//!
//! ## Subcommands
//!
//! - `to <MODE>`: make `<MODE>` the only running UI
//! - `toggle`: switch to whichever session is not current
//! - `status`: print the persisted mode and per-session process state
//!
//! Exit status is 0 when the switch completed (warnings included) and 1 on
//! lock contention, a winner that never started, or a config error. On a
//! non-zero exit the state file was not updated.

mod logging;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lifecycle_core::{
    load_config, resolve_config_path, toggle_target, ControllerConfig, ModeTag, ProcessTable,
    ServiceControl, SwitchController,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ui-switch")]
#[command(about = "Exclusive switcher between printer UI sessions")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $LIFECYCLE_CONFIG, then /etc/lifecycle-controller.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Switch to the given session
    To {
        /// Session mode tag, e.g. "guppy" or "creality"
        #[arg(value_name = "MODE")]
        mode: String,
    },

    /// Switch away from the current session
    Toggle,

    /// Show the persisted mode and which UIs are running
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = run(cli);
    std::process::exit(code);
}

fn run(cli: Cli) -> i32 {
    let config_path = resolve_config_path(cli.config);
    let loaded = load_config(Some(config_path.clone()));
    let log_dir = loaded
        .as_ref()
        .ok()
        .and_then(|config| config.switch.log_dir.clone());
    let _logging_guard = logging::init(log_dir.as_deref());

    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, path = %config_path.display(), "Failed to load configuration");
            return 1;
        }
    };
    let controller = SwitchController::from_config(&config);

    match cli.command {
        Commands::To { mode } => match ModeTag::parse(&mode) {
            Ok(mode) => switch_to(&config, &controller, &mode),
            Err(err) => {
                error!(error = %err, "Invalid mode");
                1
            }
        },
        Commands::Toggle => {
            let state = controller.current_state();
            match toggle_target(&config, &state, |name| controller.is_running(name)) {
                Ok(mode) => {
                    info!(current = %state, target = %mode, "Toggling session");
                    switch_to(&config, &controller, &mode)
                }
                Err(err) => {
                    error!(error = %err, "Cannot determine toggle target");
                    1
                }
            }
        }
        Commands::Status { json } => {
            let report = status::collect(&config, &controller);
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(err) => {
                        error!(error = %err, "Failed to serialize status");
                        return 1;
                    }
                }
            } else {
                print!("{}", status::render_text(&report));
            }
            0
        }
    }
}

fn switch_to<T: ProcessTable, S: ServiceControl>(
    config: &ControllerConfig,
    controller: &SwitchController<T, S>,
    mode: &ModeTag,
) -> i32 {
    let profiles = config
        .session(mode)
        .and_then(|winner| config.counterpart(mode).map(|loser| (loser, winner)));
    let (loser, winner) = match profiles {
        Ok(profiles) => profiles,
        Err(err) => {
            error!(error = %err, "Unknown session");
            return 1;
        }
    };

    match controller.switch(&loser, &winner) {
        Ok(report) => {
            for name in &report.kill_failures {
                warn!(process = %name, "Process survived the switch");
            }
            0
        }
        Err(err) => {
            error!(error = %err, from = %loser.mode, to = %winner.mode, "Switch failed");
            1
        }
    }
}
