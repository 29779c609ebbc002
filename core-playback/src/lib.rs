//! # Podcast Playback Coordination
//!
//! Everything between "the user tapped an episode" and the host audio player:
//!
//! - [`engine`]: the playback state machine and its command handle
//! - [`backend`]: one control surface over the two host players
//! - [`progress`]: position caching, remote sync with retry, played rules
//! - [`metadata_cache`]: per-episode progress for list and detail views
//! - [`context`]: the ordered list auto-advance walks through
//! - [`arbiter`]: ownership of the audio output shared with other audio features
//! - [`restore`]: the single-slot session snapshot
//!
//! No decoding happens here; audio is always rendered by the host.

pub mod arbiter;
pub mod backend;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod metadata_cache;
pub mod models;
pub mod progress;
pub mod resolver;
pub mod restore;

pub use arbiter::{AudioOwner, AudioResourceArbiter, RemoteCommand, RemoteCommandHandler};
pub use backend::{
    AudioBackend, BackendEvent, BackendEventKind, BackendProgress, BackendState, ElementBackend,
    LoadRequest, PlayOutcome, SessionQueueBackend,
};
pub use config::PlaybackConfig;
pub use context::{ContextKind, PlaybackContext};
pub use engine::{EngineDeps, EngineState, PlaybackEngine, MAX_SPEED, MIN_SPEED};
pub use error::{PlaybackError, Result};
pub use metadata_cache::{EpisodeMetadata, EpisodeMetadataCache, MetadataUpdate};
pub use models::{Episode, PlaybackStatus, ProgressRecord};
pub use progress::ProgressTracker;
pub use restore::{PersistedSnapshot, SessionStore};
