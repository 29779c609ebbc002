//! Storage Abstractions
//!
//! Local key-value storage plus the two file-producing collaborators the
//! playback core consults before handing a track to the host player.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences storage:
/// - iOS: UserDefaults
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite key-value table
/// - Web: localStorage
///
/// The playback core keeps its preferences here and uses one string key as the
/// single-slot session snapshot.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_preference(store: &dyn SettingsStore) -> Result<()> {
///     store.set_bool("playback.auto_advance", false).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Store a floating-point value
    async fn set_f64(&self, key: &str, value: f64) -> Result<()>;

    /// Retrieve a floating-point value
    async fn get_f64(&self, key: &str) -> Result<Option<f64>>;

    /// Delete a setting. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool>;
}

/// Artwork cache collaborator.
///
/// Maps a remote artwork URL to a file on local disk, downloading it the first
/// time. Must be idempotent: repeated calls for the same URL return the same path.
#[async_trait]
pub trait ImageCache: Send + Sync {
    async fn ensure_image_cached(&self, url: &str) -> Result<PathBuf>;
}

/// Resolves episodes the user has downloaded for offline listening.
#[async_trait]
pub trait DownloadResolver: Send + Sync {
    /// Local audio file for `episode_id`, or `None` when it must be streamed.
    async fn downloaded_path(&self, episode_id: &str) -> Result<Option<PathBuf>>;
}
