use super::{
    spawn_forwarder, AudioBackend, BackendEvent, BackendProgress, LoadRequest, PlayOutcome,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::Result;
use crate::models::normalize_duration;
use async_trait::async_trait;
use bridge_traits::MediaSessionDriver;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// Backend over a queue-based native media session.
///
/// The session queue never holds more than the current episode.
pub struct SessionQueueBackend {
    driver: Arc<dyn MediaSessionDriver>,
    events: broadcast::Sender<BackendEvent>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl SessionQueueBackend {
    pub fn new(driver: Arc<dyn MediaSessionDriver>) -> Self {
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
impl AudioBackend for SessionQueueBackend {
    #[instrument(skip(self, request), fields(episode_id = %request.episode.id, generation = request.generation))]
    async fn load(&self, request: LoadRequest) -> Result<()> {
        self.driver.reset().await?;
        // Subscribe after the reset; the forwarder also drops a late Stopped from it.
        self.restart_forwarder(request.generation);

        self.driver.add(request.session_track()).await?;
        self.driver.set_rate(request.speed).await?;
        if request.resume_at > 0.0 {
            self.driver.seek_to(request.resume_at).await?;
        }
        debug!(resume_at = request.resume_at, "Session track queued");
        Ok(())
    }

    async fn play(&self) -> Result<PlayOutcome> {
        self.driver.play().await?;
        Ok(PlayOutcome::Started)
    }

    async fn pause(&self) -> Result<()> {
        Ok(self.driver.pause().await?)
    }

    async fn stop(&self) -> Result<()> {
        self.driver.stop().await?;
        Ok(self.driver.reset().await?)
    }

    async fn seek(&self, position: f64) -> Result<()> {
        Ok(self.driver.seek_to(position).await?)
    }

    async fn set_rate(&self, rate: f32) -> Result<()> {
        Ok(self.driver.set_rate(rate).await?)
    }

    async fn progress(&self) -> Result<BackendProgress> {
        Ok(BackendProgress {
            position: self.driver.position().await?,
            duration: normalize_duration(self.driver.duration().await?),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "media_session"
    }
}

impl Drop for SessionQueueBackend {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
    }
}
