//! Downloaded episode lookup

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::DownloadResolver};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Finds downloaded audio stored as `<episode_id>.<ext>` in one directory.
///
/// Partial downloads (`.part`) are ignored.
pub struct DirectoryDownloadResolver {
    dir: PathBuf,
}

impl DirectoryDownloadResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DownloadResolver for DirectoryDownloadResolver {
    async fn downloaded_path(&self, episode_id: &str) -> Result<Option<PathBuf>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let stem = path.file_stem().and_then(|s| s.to_str());
            let ext = path.extension().and_then(|s| s.to_str());
            if stem == Some(episode_id) && ext.is_some_and(|e| e != "part") {
                debug!(episode_id, path = %path.display(), "Found downloaded episode");
                return Ok(Some(path));
            }
        }

        Ok(None)
    }
}
