//! USB device presence detection.
//!
//! The detector runs an enumeration command (`lsusb` by default) and looks for
//! a `vendor:product` token in its output. Any failure to enumerate counts as
//! "absent": a stale bridge must not keep running on the strength of a
//! detection error, and the next poll tick corrects a false negative.

use std::fmt;
use std::process::{Command, Stdio};
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::command::output_within;
use crate::error::{LifecycleError, Result};

/// Upper bound on one enumeration; a wedged `lsusb` counts as a failed query.
pub const DEFAULT_ENUMERATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor/product pair identifying the watched hardware.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    vendor_id: String,
    product_id: String,
}

impl DeviceIdentity {
    pub fn new(vendor_id: &str, product_id: &str) -> Self {
        Self {
            vendor_id: vendor_id.trim().to_ascii_lowercase(),
            product_id: product_id.trim().to_ascii_lowercase(),
        }
    }

    /// The `vendor:product` token as it appears in `lsusb` output.
    pub fn token(&self) -> String {
        format!("{}:{}", self.vendor_id, self.product_id)
    }

    fn pattern(&self) -> std::result::Result<Regex, regex::Error> {
        RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&self.token())))
            .case_insensitive(true)
            .build()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Source of the attached-device listing.
pub trait DeviceEnumerator {
    fn enumerate(&self) -> Result<String>;
}

/// Runs an external command and returns its stdout.
#[derive(Debug, Clone)]
pub struct CommandEnumerator {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandEnumerator {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: DEFAULT_ENUMERATE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CommandEnumerator {
    fn default() -> Self {
        Self::new(vec!["lsusb".to_string()])
    }
}

impl DeviceEnumerator for CommandEnumerator {
    fn enumerate(&self) -> Result<String> {
        let rendered = self.command.join(" ");
        let (program, args) =
            self.command
                .split_first()
                .ok_or_else(|| LifecycleError::DetectionFailed {
                    command: rendered.clone(),
                    details: "empty command".to_string(),
                })?;

        let output = output_within(
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
            self.timeout,
        )
        .map_err(|err| LifecycleError::DetectionFailed {
            command: rendered.clone(),
            details: err.to_string(),
        })?
        .ok_or_else(|| LifecycleError::DetectionFailed {
            command: rendered.clone(),
            details: format!("no result within {:?}", self.timeout),
        })?;

        if !output.status.success() {
            return Err(LifecycleError::DetectionFailed {
                command: rendered,
                details: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Answers "is this device attached right now?".
#[derive(Debug, Clone, Default)]
pub struct ResourceDetector<E: DeviceEnumerator> {
    enumerator: E,
}

impl<E: DeviceEnumerator> ResourceDetector<E> {
    pub fn new(enumerator: E) -> Self {
        Self { enumerator }
    }

    /// Presence check that surfaces enumeration errors.
    pub fn query(&self, identity: &DeviceIdentity) -> Result<bool> {
        let listing = self.enumerator.enumerate()?;
        let pattern = identity
            .pattern()
            .map_err(|err| LifecycleError::DetectionFailed {
                command: "pattern".to_string(),
                details: err.to_string(),
            })?;
        Ok(pattern.is_match(&listing))
    }

    /// Presence check with enumeration failures treated as absence.
    pub fn is_present(&self, identity: &DeviceIdentity) -> bool {
        match self.query(identity) {
            Ok(present) => {
                debug!(device = %identity, present, "Device presence checked");
                present
            }
            Err(err) => {
                warn!(device = %identity, error = %err, "Device detection failed; treating as absent");
                false
            }
        }
    }
}
