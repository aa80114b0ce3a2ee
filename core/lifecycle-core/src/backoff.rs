//! Respawn backoff for the supervised bridge.
//!
//! A bridge that dies right after every spawn (bad firmware, flapping cable)
//! would otherwise be relaunched on every poll tick. Spawns are counted in a
//! sliding window; past the limit, the next spawn is deferred by a step that
//! grows with each extra start, up to a cap.

use std::cmp;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub window_secs: i64,
    pub max_starts: usize,
    pub step_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            window_secs: 120,
            max_starts: 3,
            step_secs: 10,
            max_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RespawnBackoff {
    config: BackoffConfig,
    starts: Vec<DateTime<Utc>>,
}

impl RespawnBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            starts: Vec::new(),
        }
    }

    /// Seconds to wait before spawning at `now`, or `None` if a spawn may proceed.
    pub fn delay_at(&mut self, now: DateTime<Utc>) -> Option<u64> {
        self.prune(now);
        if self.starts.len() < self.config.max_starts {
            return None;
        }

        let extra = (self.starts.len() + 1).saturating_sub(self.config.max_starts) as u64;
        let backoff = cmp::min(
            self.config.step_secs.saturating_mul(extra),
            self.config.max_secs,
        );
        let last = self.starts.last().copied()?;
        let ready_at = last + Duration::seconds(backoff as i64);
        if now >= ready_at {
            None
        } else {
            Some((ready_at - now).num_seconds().max(1) as u64)
        }
    }

    pub fn record_start(&mut self, now: DateTime<Utc>) {
        self.prune(now);
        self.starts.push(now);
    }

    /// Forget history, e.g. after the device was unplugged.
    pub fn reset(&mut self) {
        self.starts.clear();
    }

    pub fn recent_starts(&self) -> usize {
        self.starts.len()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.config.window_secs;
        self.starts
            .retain(|start| now.signed_duration_since(*start).num_seconds() <= window);
    }
}
