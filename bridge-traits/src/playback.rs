//! Audio output bridge traits.
//!
//! The core never touches a decoder or a sound card. It drives one of two host
//! players through the traits below and listens to their event streams:
//!
//! - [`MediaSessionDriver`] models a queue-based native player (iOS/Android
//!   media session). It survives app backgrounding and renders lock-screen
//!   metadata and artwork.
//! - [`AudioElementDriver`] models a single-track streaming element such as an
//!   HTML `<audio>` tag. Hosts may refuse to start it without a user gesture;
//!   that refusal is reported as [`BridgeError::NotAllowed`](crate::BridgeError::NotAllowed).
//!
//! Both drivers broadcast [`DriverEvent`]s. Events carry no notion of which
//! logical consumer caused them; the core filters them by ownership.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// State notifications emitted by a host player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriverEvent {
    Playing,
    Paused,
    Stopped,
    /// The loaded track reached end of stream. Hosts may emit this more than once.
    Ended,
    Error { message: String },
}

/// Track descriptor handed to a host player.
///
/// `artwork` is always a local file; remote artwork is resolved before a track
/// reaches the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTrack {
    /// Opaque episode identifier.
    pub id: String,
    /// Local path or remote URL of the audio.
    pub url: String,
    pub title: String,
    /// Display subtitle, usually the podcast title.
    pub artist: Option<String>,
    /// Local artwork file rendered on the lock screen.
    pub artwork: PathBuf,
    /// Duration in seconds, when known ahead of time.
    pub duration: Option<f64>,
}

/// Queue-based native media session.
///
/// The core keeps at most one track queued: a load is always
/// `reset` → `add` → optional `seek_to`.
#[async_trait]
pub trait MediaSessionDriver: Send + Sync {
    /// Drop every queued track and stop output.
    async fn reset(&self) -> Result<()>;

    /// Append a track to the session queue.
    async fn add(&self, track: SessionTrack) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Seek within the current track (seconds).
    async fn seek_to(&self, position: f64) -> Result<()>;

    async fn set_rate(&self, rate: f32) -> Result<()>;

    /// Current position in seconds.
    async fn position(&self) -> Result<f64>;

    /// Duration of the current track in seconds, once the player knows it.
    async fn duration(&self) -> Result<Option<f64>>;

    /// Refresh lock-screen metadata for the current track without reloading audio.
    async fn update_now_playing(&self, track: SessionTrack) -> Result<()>;

    /// Subscribe to player state events.
    fn events(&self) -> broadcast::Receiver<DriverEvent>;
}

/// Single-track streaming element.
#[async_trait]
pub trait AudioElementDriver: Send + Sync {
    /// Point the element at a new source, discarding the previous one.
    async fn set_source(&self, url: &str) -> Result<()>;

    async fn clear_source(&self) -> Result<()>;

    /// Start playback.
    ///
    /// Returns [`BridgeError::NotAllowed`](crate::BridgeError::NotAllowed) when
    /// the host blocks playback that was not started by a user gesture.
    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn set_current_time(&self, position: f64) -> Result<()>;

    async fn set_playback_rate(&self, rate: f32) -> Result<()>;

    async fn current_time(&self) -> Result<f64>;

    async fn duration(&self) -> Result<Option<f64>>;

    /// Publish metadata to the host's media session surface, if it has one.
    async fn set_media_metadata(&self, track: SessionTrack) -> Result<()>;

    fn events(&self) -> broadcast::Receiver<DriverEvent>;
}
