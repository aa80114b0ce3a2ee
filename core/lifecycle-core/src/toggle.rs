//! Executable enable/disable by rename.
//!
//! Renaming a UI binary out of its invocation path keeps the firmware
//! watchdog from relaunching it. Disable must happen before the kill, or the
//! watchdog can respawn the process in the gap.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LifecycleError, Result};

/// Outcome of an enable/disable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleChange {
    Renamed,
    /// Already in the requested state, or neither path exists.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryToggle {
    active: PathBuf,
    disabled: PathBuf,
}

impl BinaryToggle {
    pub fn new(active: impl Into<PathBuf>, disabled: impl Into<PathBuf>) -> Self {
        Self {
            active: active.into(),
            disabled: disabled.into(),
        }
    }

    /// Disabled path is `<active>.disabled`.
    pub fn with_default_suffix(active: impl Into<PathBuf>) -> Self {
        let active = active.into();
        let mut disabled: OsString = active.clone().into_os_string();
        disabled.push(".disabled");
        Self {
            active,
            disabled: PathBuf::from(disabled),
        }
    }

    pub fn active_path(&self) -> &Path {
        &self.active
    }

    pub fn disabled_path(&self) -> &Path {
        &self.disabled
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.exists() && !self.active.exists()
    }

    pub fn disable(&self) -> Result<ToggleChange> {
        rename_if_present(&self.active, &self.disabled, "disable")
    }

    pub fn enable(&self) -> Result<ToggleChange> {
        rename_if_present(&self.disabled, &self.active, "enable")
    }
}

fn rename_if_present(from: &Path, to: &Path, action: &str) -> Result<ToggleChange> {
    if !from.exists() {
        debug!(path = %from.display(), action, "Nothing to rename");
        return Ok(ToggleChange::Unchanged);
    }
    if to.exists() {
        // Both present breaks exclusivity; never overwrite the other copy.
        return Err(LifecycleError::io(
            format!("Cannot {} {}", action, from.display()),
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ),
        ));
    }

    fs_err::rename(from, to)
        .map_err(|err| LifecycleError::io(format!("Failed to {} binary", action), err))?;
    info!(from = %from.display(), to = %to.display(), action, "Binary renamed");
    Ok(ToggleChange::Renamed)
}
