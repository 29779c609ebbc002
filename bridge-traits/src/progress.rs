//! Remote Progress Store
//!
//! The durable listening-progress record, keyed by `(user_id, episode_id)`.
//! This is the only collaborator the playback core needs the network for.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Progress row as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProgress {
    pub episode_id: String,
    /// Position in seconds.
    pub position: f64,
    /// Duration in seconds, when known.
    pub duration: Option<f64>,
    pub played: bool,
    pub last_played_at: DateTime<Utc>,
    pub speed: f32,
}

/// Durable per-user progress storage.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::progress::RemoteProgressStore;
///
/// async fn resume_point(store: &dyn RemoteProgressStore, user: &str, episode: &str) -> f64 {
///     match store.fetch(user, episode).await {
///         Ok(Some(p)) if !p.played => p.position,
///         _ => 0.0,
///     }
/// }
/// ```
#[async_trait]
pub trait RemoteProgressStore: Send + Sync {
    /// Insert or replace the record for `(user_id, progress.episode_id)`.
    async fn upsert(&self, user_id: &str, progress: RemoteProgress) -> Result<()>;

    /// Point read of a single episode's record.
    async fn fetch(&self, user_id: &str, episode_id: &str) -> Result<Option<RemoteProgress>>;
}
