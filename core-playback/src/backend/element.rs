use super::{
    spawn_forwarder, AudioBackend, BackendEvent, BackendProgress, LoadRequest, PlayOutcome,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::Result;
use crate::models::normalize_duration;
use async_trait::async_trait;
use bridge_traits::AudioElementDriver;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Backend over a single-track streaming element.
///
/// Autoplay refusals surface as [`PlayOutcome::AwaitingGesture`] rather than errors.
pub struct ElementBackend {
    driver: Arc<dyn AudioElementDriver>,
    events: broadcast::Sender<BackendEvent>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ElementBackend {
    pub fn new(driver: Arc<dyn AudioElementDriver>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            driver,
            events,
            forwarder: Mutex::new(None),
        }
    }

    fn restart_forwarder(&self, generation: u64) {
        let handle = spawn_forwarder(self.driver.events(), self.events.clone(), generation);
        if let Some(previous) = self.forwarder.lock().replace(handle) {
            previous.abort();
        }
    }
}

#[async_trait]
impl AudioBackend for ElementBackend {
    #[instrument(skip(self, request), fields(episode_id = %request.episode.id, generation = request.generation))]
    async fn load(&self, request: LoadRequest) -> Result<()> {
        self.driver.pause().await?;
        self.restart_forwarder(request.generation);

        self.driver.set_source(&request.source).await?;
        self.driver.set_playback_rate(request.speed).await?;
        if request.resume_at > 0.0 {
            self.driver.set_current_time(request.resume_at).await?;
        }
        // Metadata is cosmetic; a host without a media-session API still plays.
        if let Err(e) = self.driver.set_media_metadata(request.session_track()).await {
            debug!(error = %e, "Media metadata not applied");
        }
        Ok(())
    }

    async fn play(&self) -> Result<PlayOutcome> {
        match self.driver.play().await {
            Ok(()) => Ok(PlayOutcome::Started),
            Err(e) if e.is_not_allowed() => {
                info!("Autoplay blocked, waiting for a user gesture");
                Ok(PlayOutcome::AwaitingGesture)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn pause(&self) -> Result<()> {
        Ok(self.driver.pause().await?)
    }

    async fn stop(&self) -> Result<()> {
        self.driver.pause().await?;
        Ok(self.driver.clear_source().await?)
    }

    async fn seek(&self, position: f64) -> Result<()> {
        Ok(self.driver.set_current_time(position).await?)
    }

    async fn set_rate(&self, rate: f32) -> Result<()> {
        Ok(self.driver.set_playback_rate(rate).await?)
    }

    async fn progress(&self) -> Result<BackendProgress> {
        Ok(BackendProgress {
            position: self.driver.current_time().await?,
            duration: normalize_duration(self.driver.duration().await?),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "audio_element"
    }
}

impl Drop for ElementBackend {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
    }
}
