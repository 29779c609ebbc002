//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`CoreConfig`] into a running playback core:
//! one [`AudioResourceArbiter`], one [`EpisodeMetadataCache`] and one
//! [`PlaybackEngine`] sharing a single [`EventBus`]. Hosts keep the returned
//! [`CoreService`] for the lifetime of the app and hand clones of its
//! components to their UI layer. Nothing here is a process-wide singleton.
//!
//! With the `desktop-shims` feature the desktop bridge adapters are
//! re-exported as [`desktop`].
//!
//! ```ignore
//! use core_playback::PlaybackConfig;
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder() /* bridges */ .build()?;
//! let core = CoreService::bootstrap(config, PlaybackConfig::default()).await?;
//! core.engine().play_episode(episode, None).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_playback::{
    AudioOwner, AudioResourceArbiter, EngineState, Episode, EpisodeMetadataCache,
    PlaybackConfig, PlaybackContext, PlaybackEngine,
};
pub use core_runtime::config::{AudioOutput, CoreConfig};
pub use core_runtime::events::{CoreEvent, EventBus};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub mod desktop {
    pub use bridge_desktop::*;
}

use std::sync::Arc;

use bridge_traits::LifecycleObserver;
use core_playback::{AudioBackend, ElementBackend, EngineDeps, SessionQueueBackend, SessionStore};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<Inner>,
}

struct Inner {
    engine: PlaybackEngine,
    arbiter: Arc<AudioResourceArbiter>,
    cache: Arc<EpisodeMetadataCache>,
    events: EventBus,
    lifecycle_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    /// The watcher holds an engine handle; stopping it lets the command
    /// channel close so the actor runs its teardown flush.
    fn drop(&mut self) {
        if let Some(task) = self.lifecycle_task.get_mut().take() {
            task.abort();
        }
    }
}

impl CoreService {
    /// Build every playback component from `config` and start the engine.
    ///
    /// When session restore is enabled the last snapshot is loaded paused
    /// before this returns. A lifecycle observer, if configured, flushes
    /// progress each time the app leaves the foreground.
    pub async fn bootstrap(config: CoreConfig, playback: PlaybackConfig) -> Result<Self> {
        config.validate()?;
        info!(audio_output = config.audio_output.kind(), "Bootstrapping playback core");

        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let arbiter = Arc::new(AudioResourceArbiter::new().with_event_bus(events.clone()));
        let cache = Arc::new(EpisodeMetadataCache::new(playback.metadata_cache_capacity));

        let backend: Arc<dyn AudioBackend> = match &config.audio_output {
            AudioOutput::MediaSession(driver) => Arc::new(SessionQueueBackend::new(driver.clone())),
            AudioOutput::AudioElement(driver) => Arc::new(ElementBackend::new(driver.clone())),
        };

        let auto_advance = match SessionStore::new(config.settings_store.clone())
            .auto_advance()
            .await
        {
            Ok(stored) => stored.unwrap_or(config.features.auto_advance),
            Err(e) => {
                warn!(error = %e, "Failed to read auto-advance preference, using default");
                config.features.auto_advance
            }
        };

        let engine = PlaybackEngine::spawn(
            playback,
            EngineDeps {
                user_id: config.user_id.clone(),
                backend,
                arbiter: arbiter.clone(),
                cache: cache.clone(),
                progress_store: config.progress_store.clone(),
                settings: config.settings_store.clone(),
                image_cache: config.image_cache.clone(),
                download_resolver: config.download_resolver.clone(),
                clock: config.clock.clone(),
                placeholder_artwork: config.placeholder_artwork.clone(),
                events: events.clone(),
                auto_advance,
            },
        )?;

        if config.features.restore_session {
            match engine.restore_session().await {
                Ok(true) => info!("Previous session restored"),
                Ok(false) => debug!("No session to restore"),
                Err(e) => warn!(error = %e, "Session restore failed"),
            }
        }

        let lifecycle_task = match &config.lifecycle_observer {
            Some(observer) => Some(spawn_lifecycle_watcher(observer.clone(), engine.clone()).await?),
            None => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                arbiter,
                cache,
                events,
                lifecycle_task: Mutex::new(lifecycle_task),
            }),
        })
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.inner.engine
    }

    pub fn arbiter(&self) -> Arc<AudioResourceArbiter> {
        Arc::clone(&self.inner.arbiter)
    }

    pub fn metadata_cache(&self) -> Arc<EpisodeMetadataCache> {
        Arc::clone(&self.inner.cache)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Stop watching the lifecycle, flush pending progress and stop the engine.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(task) = self.inner.lifecycle_task.lock().take() {
            task.abort();
        }
        self.inner.engine.shutdown().await?;
        info!("Playback core shut down");
        Ok(())
    }
}

async fn spawn_lifecycle_watcher(
    observer: Arc<dyn LifecycleObserver>,
    engine: PlaybackEngine,
) -> Result<JoinHandle<()>> {
    let mut stream = observer
        .subscribe_changes()
        .await
        .map_err(|e| CoreError::InitializationFailed(format!("Lifecycle subscription failed: {}", e)))?;

    Ok(tokio::spawn(async move {
        while let Some(state) = stream.next().await {
            if !state.is_leaving_foreground() {
                continue;
            }
            debug!(?state, "App leaving foreground, flushing progress");
            if let Err(e) = engine.flush().await {
                warn!(error = %e, "Flush on background failed");
                if matches!(e, core_playback::PlaybackError::EngineClosed) {
                    break;
                }
            }
        }
    }))
}
