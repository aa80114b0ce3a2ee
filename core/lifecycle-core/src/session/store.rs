//! Persisted UI session mode.
//!
//! A single-line file holding the mode tag of the last successful switch.
//! External triggers read it to decide which direction to switch next. It
//! lives on tmpfs by default: it survives controller restarts, not reboots.
//!
//! # Atomic Writes
//!
//! Uses temp file + rename so a reader never sees a truncated tag. There is
//! no locking here; writers are serialized by the session lock.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{LifecycleError, Result};

/// Validated mode tag: non-empty, lowercase ASCII letters, digits, `-`, `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModeTag(String);

impl ModeTag {
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(LifecycleError::UnknownMode(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ModeTag {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl fmt::Display for ModeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the state file says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Never written, empty, or unreadable.
    Unknown,
    Active(ModeTag),
}

impl SessionState {
    pub fn mode(&self) -> Option<&ModeTag> {
        match self {
            SessionState::Unknown => None,
            SessionState::Active(mode) => Some(mode),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unknown => f.write_str("unknown"),
            SessionState::Active(mode) => mode.fmt(f),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last written mode, or `Unknown`.
    ///
    /// A garbled file is logged and reported as `Unknown` rather than failing
    /// the caller.
    pub fn read(&self) -> SessionState {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return SessionState::Unknown;
            }
            Err(err) => {
                warn!(error = %err, "Failed to read session state; treating as unknown");
                return SessionState::Unknown;
            }
        };

        let line = content.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return SessionState::Unknown;
        }
        match ModeTag::parse(line) {
            Ok(mode) => SessionState::Active(mode),
            Err(_) => {
                warn!(path = %self.path.display(), value = line, "Session state file holds an invalid tag");
                SessionState::Unknown
            }
        }
    }

    /// Atomically replaces the persisted mode.
    pub fn write(&self, mode: &ModeTag) -> Result<()> {
        let parent_dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs_err::create_dir_all(parent_dir)
            .map_err(|err| LifecycleError::io("Failed to create state directory", err))?;

        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|err| LifecycleError::io("Failed to create temp state file", err))?;
        writeln!(temp_file, "{}", mode)
            .map_err(|err| LifecycleError::io("Failed to write temp state file", err))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|err| LifecycleError::io("Failed to sync temp state file", err))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| LifecycleError::io("Failed to commit state file", err.error))?;

        info!(path = %self.path.display(), mode = %mode, "Session state written");
        Ok(())
    }
}
