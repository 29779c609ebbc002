//! # Playback Error Types
//!
//! Error types for the playback coordination engine.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// The host player rejected or failed a control call.
    #[error("Audio backend error: {0}")]
    Backend(String),

    /// Loading an episode into the backend failed.
    #[error("Failed to load episode {episode_id}: {message}")]
    LoadFailed { episode_id: String, message: String },

    // ========================================================================
    // Playback Control Errors
    // ========================================================================
    /// Attempted operation when no episode is loaded.
    #[error("No episode loaded")]
    NoEpisodeLoaded,

    /// Another `play_episode` is still resolving; the new request was dropped.
    #[error("An episode is already loading")]
    LoadInProgress,

    /// Playback speed outside the supported range.
    #[error("Invalid playback speed: {0} (must be between 0.5 and 3.0)")]
    InvalidSpeed(f32),

    /// Seek target is not a finite, non-negative number.
    #[error("Invalid seek position: {0}")]
    InvalidPosition(f64),

    /// Context construction was given no episodes.
    #[error("Playback context cannot be empty")]
    EmptyContext,

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Remote progress store failure.
    #[error("Progress sync failed: {0}")]
    ProgressSync(String),

    /// Local snapshot or preference storage failure.
    #[error("Local storage error: {0}")]
    Storage(String),

    /// Snapshot could not be encoded or decoded.
    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Invalid engine configuration.
    #[error("Invalid playback configuration: {0}")]
    Config(String),

    /// The engine task has exited.
    #[error("Playback engine is shut down")]
    EngineClosed,

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::Backend(_)
                | PlaybackError::LoadFailed { .. }
                | PlaybackError::ProgressSync(_)
                | PlaybackError::LoadInProgress
        )
    }

    /// Returns `true` if the caller should show this error to the user.
    ///
    /// Only explicit user actions without a silent fallback qualify; background
    /// persistence failures are logged instead.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            PlaybackError::LoadFailed { .. }
                | PlaybackError::InvalidSpeed(_)
                | PlaybackError::InvalidPosition(_)
                | PlaybackError::NoEpisodeLoaded
                | PlaybackError::EmptyContext
        )
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(err: BridgeError) -> Self {
        PlaybackError::Backend(err.to_string())
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
