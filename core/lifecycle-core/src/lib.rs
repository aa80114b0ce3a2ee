//! # lifecycle-core
//!
//! Process lifecycle control for a 3D printer host: a USB bridge kept in step
//! with device presence, and exclusive switching between two touchscreen UIs.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Each controller is its own OS process.
//! - **Verified transitions**: kills and starts are re-checked by polling, with bounded retries.
//! - **Graceful degradation**: Missing config or state files yield defaults, not errors.
//! - **Traits at the OS seams**: device enumeration, the process table and service
//!   control are traits so the state machines run against fakes in tests.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lifecycle_core::{load_config, SwitchController};
//!
//! let config = load_config(None)?;
//! let winner = config.session(&"guppy".parse()?)?;
//! let loser = config.counterpart(&winner.mode)?;
//! SwitchController::from_config(&config).switch(&loser, &winner)?;
//! ```

pub mod backoff;
pub mod cancel;
pub mod command;
pub mod config;
pub mod detector;
pub mod error;
pub mod process;
pub mod service;
pub mod session;
pub mod supervisor;
pub mod switch;
pub mod toggle;

pub use backoff::{BackoffConfig, RespawnBackoff};
pub use cancel::CancellationToken;
pub use config::*;
pub use detector::{CommandEnumerator, DeviceEnumerator, DeviceIdentity, ResourceDetector};
pub use error::{LifecycleError, Result};
pub use process::{
    is_pid_alive, ManagedProcess, ManagedProcessHandle, ProcessTable, RetryPolicy,
    SystemProcessTable,
};
pub use service::{InitScriptControl, ServiceControl, ServiceVerb};
pub use session::{ExclusiveSession, ModeTag, SessionLock, SessionState, StateStore};
pub use supervisor::{
    BridgeSpec, BridgeState, SupervisorLoop, SupervisorOptions, SupervisorStats, Transition,
};
pub use switch::{toggle_target, SessionProfile, SwitchController, SwitchOptions, SwitchReport};
pub use toggle::{BinaryToggle, ToggleChange};
