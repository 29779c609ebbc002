//! # Playback Configuration
//!
//! Timing and sizing knobs for the playback engine and its progress tracker.

use crate::error::{PlaybackError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback engine configuration.
///
/// Every field has a serde default, so a partial JSON/TOML document only needs
/// to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// How often position is sampled while playing and written to the metadata cache.
    ///
    /// Default: 1 second.
    #[serde(default = "default_cache_tick")]
    pub cache_tick: Duration,

    /// Quiet period after a change before the local session snapshot is written.
    ///
    /// Default: 2 seconds.
    #[serde(default = "default_snapshot_debounce")]
    pub snapshot_debounce: Duration,

    /// Interval between remote progress upserts while playing.
    ///
    /// Default: 15 seconds.
    #[serde(default = "default_remote_sync_interval")]
    pub remote_sync_interval: Duration,

    /// Remaining time (seconds) at or below which an episode counts as played.
    ///
    /// Default: 25 seconds.
    #[serde(default = "default_near_end_threshold_secs")]
    pub near_end_threshold_secs: f64,

    /// Attempts per remote upsert before giving up until the next sync.
    ///
    /// Default: 3.
    #[serde(default = "default_sync_max_attempts")]
    pub sync_max_attempts: u32,

    /// Delay before the first retry; doubles on each further attempt.
    ///
    /// Default: 1 second.
    #[serde(default = "default_sync_initial_backoff")]
    pub sync_initial_backoff: Duration,

    /// Upper bound on the retry delay.
    ///
    /// Default: 8 seconds.
    #[serde(default = "default_sync_max_backoff")]
    pub sync_max_backoff: Duration,

    /// Capacity of the engine command channel.
    ///
    /// Default: 64.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    /// Maximum number of episodes held by the metadata cache.
    ///
    /// Default: 2048.
    #[serde(default = "default_metadata_cache_capacity")]
    pub metadata_cache_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            cache_tick: default_cache_tick(),
            snapshot_debounce: default_snapshot_debounce(),
            remote_sync_interval: default_remote_sync_interval(),
            near_end_threshold_secs: default_near_end_threshold_secs(),
            sync_max_attempts: default_sync_max_attempts(),
            sync_initial_backoff: default_sync_initial_backoff(),
            sync_max_backoff: default_sync_max_backoff(),
            command_buffer: default_command_buffer(),
            metadata_cache_capacity: default_metadata_cache_capacity(),
        }
    }
}

impl PlaybackConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_tick.is_zero() {
            return Err(PlaybackError::Config(
                "cache_tick must be greater than zero".to_string(),
            ));
        }

        if self.snapshot_debounce.is_zero() {
            return Err(PlaybackError::Config(
                "snapshot_debounce must be greater than zero".to_string(),
            ));
        }

        if self.remote_sync_interval.is_zero() {
            return Err(PlaybackError::Config(
                "remote_sync_interval must be greater than zero".to_string(),
            ));
        }

        if !self.near_end_threshold_secs.is_finite() || self.near_end_threshold_secs < 0.0 {
            return Err(PlaybackError::Config(
                "near_end_threshold_secs must be a non-negative number".to_string(),
            ));
        }

        if self.sync_max_attempts == 0 {
            return Err(PlaybackError::Config(
                "sync_max_attempts must be at least 1".to_string(),
            ));
        }

        if self.sync_max_backoff < self.sync_initial_backoff {
            return Err(PlaybackError::Config(
                "sync_max_backoff must be >= sync_initial_backoff".to_string(),
            ));
        }

        if self.command_buffer == 0 || self.metadata_cache_capacity == 0 {
            return Err(PlaybackError::Config(
                "command_buffer and metadata_cache_capacity must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Backoff before retry number `attempt` (1-based): `initial * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.sync_initial_backoff
            .saturating_mul(2u32.pow(exp))
            .min(self.sync_max_backoff)
    }
}

// Default value functions for serde
fn default_cache_tick() -> Duration {
    Duration::from_secs(1)
}

fn default_snapshot_debounce() -> Duration {
    Duration::from_secs(2)
}

fn default_remote_sync_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_near_end_threshold_secs() -> f64 {
    25.0
}

fn default_sync_max_attempts() -> u32 {
    3
}

fn default_sync_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_sync_max_backoff() -> Duration {
    Duration::from_secs(8)
}

fn default_command_buffer() -> usize {
    64
}

fn default_metadata_cache_capacity() -> usize {
    2048
}
