//! # Episode Metadata Cache
//!
//! In-memory, per-episode progress store read by list and detail views.
//! Written on every position tick, so reads never reach the remote store.
//!
//! Bounded by an LRU policy; views that want live updates subscribe to the
//! change feed instead of polling.

use crate::models::{normalize_duration, ProgressRecord};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tokio::sync::broadcast;
use tracing::trace;

const CHANGE_FEED_CAPACITY: usize = 256;

/// Cached progress for one episode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Seconds.
    pub position: f64,
    pub duration: Option<f64>,
    /// Fraction listened in `[0, 1]`, when the duration is known.
    pub progress: Option<f64>,
    pub played: bool,
}

impl From<&ProgressRecord> for EpisodeMetadata {
    fn from(record: &ProgressRecord) -> Self {
        Self {
            position: record.position,
            duration: record.duration,
            progress: record.fraction(),
            played: record.played,
        }
    }
}

/// Change notification published after every write.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub episode_id: String,
    pub metadata: EpisodeMetadata,
}

pub struct EpisodeMetadataCache {
    entries: Mutex<LruCache<String, EpisodeMetadata>>,
    changes: broadcast::Sender<MetadataUpdate>,
}

impl EpisodeMetadataCache {
    /// Create a cache holding at most `capacity` episodes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            changes,
        }
    }

    pub fn get(&self, episode_id: &str) -> Option<EpisodeMetadata> {
        self.entries.lock().get(episode_id).cloned()
    }

    pub fn set(&self, episode_id: &str, metadata: EpisodeMetadata) {
        self.entries
            .lock()
            .put(episode_id.to_string(), metadata.clone());
        self.publish(episode_id, metadata);
    }

    /// Store a full progress record.
    pub fn record(&self, record: &ProgressRecord) {
        self.set(&record.episode_id, EpisodeMetadata::from(record));
    }

    /// Update position and duration, keeping the played flag.
    pub fn update_position(&self, episode_id: &str, position: f64, duration: Option<f64>) {
        let metadata = {
            let mut entries = self.entries.lock();
            let played = entries.peek(episode_id).map(|m| m.played).unwrap_or(false);
            let record = ProgressRecord::new(episode_id, position, normalize_duration(duration), played, 1.0);
            let metadata = EpisodeMetadata::from(&record);
            entries.put(episode_id.to_string(), metadata.clone());
            metadata
        };
        self.publish(episode_id, metadata);
    }

    pub fn set_played(&self, episode_id: &str, played: bool) {
        let metadata = {
            let mut entries = self.entries.lock();
            let mut metadata = entries.peek(episode_id).cloned().unwrap_or_default();
            metadata.played = played;
            entries.put(episode_id.to_string(), metadata.clone());
            metadata
        };
        self.publish(episode_id, metadata);
    }

    pub fn remove(&self, episode_id: &str) -> Option<EpisodeMetadata> {
        self.entries.lock().pop(episode_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetadataUpdate> {
        self.changes.subscribe()
    }

    fn publish(&self, episode_id: &str, metadata: EpisodeMetadata) {
        trace!(episode_id, position = metadata.position, played = metadata.played, "Metadata cache updated");
        // No subscribers is fine.
        let _ = self.changes.send(MetadataUpdate {
            episode_id: episode_id.to_string(),
            metadata,
        });
    }
}

impl Default for EpisodeMetadataCache {
    fn default() -> Self {
        Self::new(crate::config::PlaybackConfig::default().metadata_cache_capacity)
    }
}
