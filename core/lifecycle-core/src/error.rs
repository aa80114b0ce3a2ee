//! Error types for lifecycle-core operations.
//!
//! Only a few of these are fatal to a controller process. Kill verification
//! failures are logged as warnings by callers, detection failures collapse into
//! "device absent", and the binaries decide exit codes from the rest.

use std::path::PathBuf;

/// All errors that can occur in lifecycle-core operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Unknown session mode: {0}")]
    UnknownMode(String),

    // ─────────────────────────────────────────────────────────────────────
    // Detection Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Device enumeration failed: {command}: {details}")]
    DetectionFailed { command: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Process Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {name} still running after {attempts} kill attempts")]
    KillVerificationFailed { name: String, attempts: u32 },

    #[error("Process {name} did not appear after {attempts} checks")]
    StartVerificationFailed { name: String, attempts: u32 },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Switch already in progress (lock held at {0})")]
    LockContention(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Service / I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LifecycleError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LifecycleError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors that must stop a one-shot switch with a non-zero exit.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            LifecycleError::KillVerificationFailed { .. } | LifecycleError::DetectionFailed { .. }
        )
    }
}

/// Convenience type alias for Results using LifecycleError.
pub type Result<T> = std::result::Result<T, LifecycleError>;
