//! # Core Configuration Module
//!
//! Dependency injection for the podcast playback core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every host bridge and setting the core needs. It
//! enforces fail-fast validation so a missing capability is reported at
//! startup with an actionable message rather than as a playback failure later.
//!
//! ## Required Dependencies
//!
//! - `user_id` - Owner of remote progress rows
//! - [`AudioOutput`] - Either a `MediaSessionDriver` or an `AudioElementDriver`
//! - `RemoteProgressStore` - Durable listening progress
//! - `SettingsStore` - Preferences and the session snapshot slot
//! - `placeholder_artwork` - Local image shown when artwork cannot be cached
//!
//! ## Optional Dependencies
//!
//! - `ImageCache` - Without it every track gets the placeholder artwork
//! - `DownloadResolver` - Without it every episode is streamed
//! - `LifecycleObserver` - Without it progress is only flushed on pause/switch/shutdown
//! - `Clock` - Defaults to [`SystemClock`]
//!
//! When the `desktop-shims` feature is enabled, a SQLite-backed `SettingsStore`
//! under `data_dir` is injected automatically if none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{AudioOutput, CoreConfig};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .user_id("usr_8d1f")
//!     .audio_output(AudioOutput::MediaSession(Arc::new(MySessionDriver)))
//!     .progress_store(Arc::new(MyProgressApi))
//!     .settings_store(Arc::new(MySettings))
//!     .placeholder_artwork("/app/assets/podcast-placeholder.png")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    AudioElementDriver, Clock, DownloadResolver, ImageCache, LifecycleObserver,
    MediaSessionDriver, RemoteProgressStore, SettingsStore, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which host player the core drives.
#[derive(Clone)]
pub enum AudioOutput {
    /// Queue-based native media session (mobile).
    MediaSession(Arc<dyn MediaSessionDriver>),
    /// Single-track streaming element (web).
    AudioElement(Arc<dyn AudioElementDriver>),
}

impl AudioOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            AudioOutput::MediaSession(_) => "media_session",
            AudioOutput::AudioElement(_) => "audio_element",
        }
    }
}

impl std::fmt::Debug for AudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AudioOutput::{}", self.kind())
    }
}

/// Core configuration for the podcast playback core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Identity used as the first half of every remote progress key
    pub user_id: String,

    /// Host player
    pub audio_output: AudioOutput,

    /// Durable progress storage (required)
    pub progress_store: Arc<dyn RemoteProgressStore>,

    /// Preferences and session snapshot storage (required)
    pub settings_store: Arc<dyn SettingsStore>,

    /// Artwork cache (optional)
    pub image_cache: Option<Arc<dyn ImageCache>>,

    /// Offline download lookup (optional)
    pub download_resolver: Option<Arc<dyn DownloadResolver>>,

    /// App lifecycle observer (optional)
    pub lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,

    /// Time source for snapshot and progress timestamps
    pub clock: Arc<dyn Clock>,

    /// Local image used whenever real artwork is unavailable
    pub placeholder_artwork: PathBuf,

    /// Directory for core-owned files (desktop settings database)
    pub data_dir: Option<PathBuf>,

    /// Feature flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("user_id", &crate::logging::redact_if_sensitive("user_id", &self.user_id))
            .field("audio_output", &self.audio_output)
            .field("progress_store", &"RemoteProgressStore { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "image_cache",
                &self.image_cache.as_ref().map(|_| "ImageCache { ... }"),
            )
            .field(
                "download_resolver",
                &self.download_resolver.as_ref().map(|_| "DownloadResolver { ... }"),
            )
            .field(
                "lifecycle_observer",
                &self.lifecycle_observer.as_ref().map(|_| "LifecycleObserver { ... }"),
            )
            .field("placeholder_artwork", &self.placeholder_artwork)
            .field("data_dir", &self.data_dir)
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Default for the auto-advance preference when the user never set one
    pub auto_advance: bool,

    /// Restore the last saved session (paused) at startup
    pub restore_session: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            auto_advance: true,
            restore_session: true,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - User id is not blank
    /// - Placeholder artwork path is not empty
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::Config("User id cannot be empty".to_string()));
        }

        if self.placeholder_artwork.as_os_str().is_empty() {
            return Err(Error::Config(
                "Placeholder artwork path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn settings_store_missing_error() -> Error {
    Error::capability_missing(
        "SettingsStore",
        "SettingsStore implementation is required for preferences and session restore. \
         Desktop: enable the 'desktop-shims' feature and set data_dir to use SqliteSettingsStore. \
         Mobile: inject platform-native settings (UserDefaults/DataStore). \
         Web: inject a localStorage-based settings store.",
    )
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(data_dir: Option<&Path>) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let data_dir = data_dir.ok_or_else(|| {
        Error::Config(
            "data_dir is required when relying on the default desktop SettingsStore. \
             Use .data_dir() or inject a SettingsStore."
                .to_string(),
        )
    })?;
    let path = data_dir.join("settings.db");

    let init_store = |path: PathBuf| -> Result<SqliteSettingsStore> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default settings store: {}",
                    e
                ))
            })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on panics inside an existing runtime, so hop to a plain thread
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_data_dir: Option<&Path>) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    user_id: Option<String>,
    audio_output: Option<AudioOutput>,
    progress_store: Option<Arc<dyn RemoteProgressStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    image_cache: Option<Arc<dyn ImageCache>>,
    download_resolver: Option<Arc<dyn DownloadResolver>>,
    lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    clock: Option<Arc<dyn Clock>>,
    placeholder_artwork: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the listener identity used for remote progress rows.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the host player.
    pub fn audio_output(mut self, output: AudioOutput) -> Self {
        self.audio_output = Some(output);
        self
    }

    pub fn progress_store(mut self, store: Arc<dyn RemoteProgressStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn image_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.image_cache = Some(cache);
        self
    }

    pub fn download_resolver(mut self, resolver: Arc<dyn DownloadResolver>) -> Self {
        self.download_resolver = Some(resolver);
        self
    }

    pub fn lifecycle_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle_observer = Some(observer);
        self
    }

    /// Overrides the time source (tests use a fixed clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the local image used when artwork is missing or cannot be cached.
    pub fn placeholder_artwork<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.placeholder_artwork = Some(path.into());
        self
    }

    /// Sets the directory for core-owned files.
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the default auto-advance preference.
    pub fn auto_advance(mut self, enabled: bool) -> Self {
        self.features.auto_advance = enabled;
        self
    }

    /// Enables or disables session restore at startup.
    pub fn restore_session(mut self, enabled: bool) -> Self {
        self.features.restore_session = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when a required value is missing or blank
    /// - [`Error::CapabilityMissing`] when a required bridge is missing
    pub fn build(self) -> Result<CoreConfig> {
        let user_id = self.user_id.ok_or_else(|| {
            Error::Config("User id is required. Use .user_id() to set it.".to_string())
        })?;

        let placeholder_artwork = self.placeholder_artwork.ok_or_else(|| {
            Error::Config(
                "Placeholder artwork is required. Use .placeholder_artwork() to set it."
                    .to_string(),
            )
        })?;

        let audio_output = self.audio_output.ok_or_else(|| {
            Error::capability_missing(
                "AudioOutput",
                "No audio output provided. \
                 Mobile: inject a MediaSessionDriver. \
                 Web: inject an AudioElementDriver.",
            )
        })?;

        let progress_store = self.progress_store.ok_or_else(|| {
            Error::capability_missing(
                "RemoteProgressStore",
                "RemoteProgressStore implementation is required to persist listening progress. \
                 Desktop: use bridge_desktop::HttpProgressStore.",
            )
        })?;

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(self.data_dir.as_deref())?,
        };

        let config = CoreConfig {
            user_id,
            audio_output,
            progress_store,
            settings_store,
            image_cache: self.image_cache,
            download_resolver: self.download_resolver,
            lifecycle_observer: self.lifecycle_observer,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            placeholder_artwork,
            data_dir: self.data_dir,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
