//! # Audio Backend
//!
//! Uniform control surface over the two host players. The engine only ever
//! talks to [`AudioBackend`]; which concrete player sits underneath is decided
//! once, at bootstrap, from the configured audio output.
//!
//! Every backend event is tagged with the generation of the load that produced
//! it. A new `load` starts a fresh event forwarder, so events from a previous
//! track carry an older generation and the engine can drop them.

mod element;
mod session;

pub use element::ElementBackend;
pub use session::SessionQueueBackend;

use crate::error::Result;
use crate::models::Episode;
use async_trait::async_trait;
use bridge_traits::{DriverEvent, SessionTrack};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything a backend needs to load one episode.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub generation: u64,
    pub episode: Episode,
    /// Local path or remote URL.
    pub source: String,
    /// Local artwork file.
    pub artwork: PathBuf,
    /// Seconds; `0` starts from the beginning.
    pub resume_at: f64,
    pub speed: f32,
}

impl LoadRequest {
    pub(crate) fn session_track(&self) -> SessionTrack {
        SessionTrack {
            id: self.episode.id.clone(),
            url: self.source.clone(),
            title: self.episode.title.clone(),
            artist: self.episode.podcast_title.clone(),
            artwork: self.artwork.clone(),
            duration: self.episode.duration,
        }
    }
}

/// Result of asking the backend to start audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// The host refused to start without a user gesture. Not an error.
    AwaitingGesture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEventKind {
    StateChanged(BackendState),
    TrackEnded,
    Failed(String),
}

impl From<DriverEvent> for BackendEventKind {
    fn from(event: DriverEvent) -> Self {
        match event {
            DriverEvent::Playing => BackendEventKind::StateChanged(BackendState::Playing),
            DriverEvent::Paused => BackendEventKind::StateChanged(BackendState::Paused),
            DriverEvent::Stopped => BackendEventKind::StateChanged(BackendState::Stopped),
            DriverEvent::Ended => BackendEventKind::TrackEnded,
            DriverEvent::Error { message } => BackendEventKind::Failed(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendEvent {
    pub generation: u64,
    pub kind: BackendEventKind,
}

/// Position and duration as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BackendProgress {
    pub position: f64,
    pub duration: Option<f64>,
}

/// Control surface over a host audio player.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Replace whatever is loaded with `request`. Does not start playback.
    async fn load(&self, request: LoadRequest) -> Result<()>;

    async fn play(&self) -> Result<PlayOutcome>;

    async fn pause(&self) -> Result<()>;

    /// Stop and release the loaded track.
    async fn stop(&self) -> Result<()>;

    async fn seek(&self, position: f64) -> Result<()>;

    async fn set_rate(&self, rate: f32) -> Result<()>;

    async fn progress(&self) -> Result<BackendProgress>;

    /// Generation-tagged event stream. Subscribe once; it spans every load.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Forward driver events as [`BackendEvent`]s tagged with `generation`.
///
/// `Paused` and `Stopped` are dropped until the driver reports `Playing`.
/// Before that they can only come from tearing down the previous track,
/// which a host may deliver after the new subscription is in place.
pub(crate) fn spawn_forwarder(
    mut driver_events: broadcast::Receiver<DriverEvent>,
    out: broadcast::Sender<BackendEvent>,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut started = false;
        loop {
            match driver_events.recv().await {
                Ok(event) => {
                    match event {
                        DriverEvent::Playing => started = true,
                        DriverEvent::Paused | DriverEvent::Stopped if !started => {
                            trace!(generation, ?event, "Dropping teardown event from previous track");
                            continue;
                        }
                        _ => {}
                    }
                    let _ = out.send(BackendEvent {
                        generation,
                        kind: event.into(),
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(generation, skipped, "Driver event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwarder_drops_late_teardown_events() {
        let (driver_tx, _) = broadcast::channel(8);
        let (out, mut events) = broadcast::channel(8);
        let handle = spawn_forwarder(driver_tx.subscribe(), out, 4);

        // Pause from the previous track delivered after the new subscription.
        driver_tx.send(DriverEvent::Paused).unwrap();
        driver_tx.send(DriverEvent::Stopped).unwrap();
        driver_tx.send(DriverEvent::Playing).unwrap();
        driver_tx.send(DriverEvent::Paused).unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.generation, 4);
        assert_eq!(first.kind, BackendEventKind::StateChanged(BackendState::Playing));
        assert_eq!(
            events.recv().await.unwrap().kind,
            BackendEventKind::StateChanged(BackendState::Paused)
        );
        handle.abort();
    }

    #[tokio::test]
    async fn test_forwarder_passes_errors_before_playing() {
        let (driver_tx, _) = broadcast::channel(8);
        let (out, mut events) = broadcast::channel(8);
        let handle = spawn_forwarder(driver_tx.subscribe(), out, 1);

        driver_tx
            .send(DriverEvent::Error {
                message: "source unreachable".into(),
            })
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, BackendEventKind::Failed("source unreachable".into()));
        handle.abort();
    }
}
