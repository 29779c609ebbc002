//! Resolution of what actually gets handed to the audio backend: a playable
//! source (downloaded file first, stream URL otherwise) and a local artwork
//! file for the lock screen.

use crate::models::Episode;
use bridge_traits::{DownloadResolver, ImageCache};
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MediaResolver {
    image_cache: Option<Arc<dyn ImageCache>>,
    downloads: Option<Arc<dyn DownloadResolver>>,
    placeholder: PathBuf,
}

impl MediaResolver {
    pub fn new(
        image_cache: Option<Arc<dyn ImageCache>>,
        downloads: Option<Arc<dyn DownloadResolver>>,
        placeholder: PathBuf,
    ) -> Self {
        Self {
            image_cache,
            downloads,
            placeholder,
        }
    }

    pub fn placeholder(&self) -> &Path {
        &self.placeholder
    }

    /// Local artwork for `episode`.
    ///
    /// Never returns a remote URL: missing artwork, a missing cache, a failed
    /// fetch, or a cache answer that is not a local path all yield the placeholder.
    pub async fn artwork_for(&self, episode: &Episode) -> PathBuf {
        let (Some(url), Some(cache)) = (episode.artwork_url.as_deref(), &self.image_cache) else {
            return self.placeholder.clone();
        };

        match cache.ensure_image_cached(url).await {
            Ok(path) if is_local(&path) => path,
            Ok(path) => {
                warn!(episode_id = %episode.id, path = %path.display(), "Image cache returned a non-local path, using placeholder");
                self.placeholder.clone()
            }
            Err(e) => {
                debug!(episode_id = %episode.id, error = %e, "Artwork unavailable, using placeholder");
                self.placeholder.clone()
            }
        }
    }

    /// Playable source for `episode`: a downloaded file when one exists.
    pub async fn source_for(&self, episode: &Episode) -> String {
        if let Some(downloads) = &self.downloads {
            match downloads.downloaded_path(&episode.id).await {
                Ok(Some(path)) => {
                    let source = path.to_string_lossy().into_owned();
                    debug!(episode_id = %episode.id, file = %strip_path(&source), "Using downloaded copy");
                    return source;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(episode_id = %episode.id, error = %e, "Download lookup failed, streaming instead");
                }
            }
        }
        episode.audio_url.clone()
    }
}

fn is_local(path: &Path) -> bool {
    let s = path.to_string_lossy();
    !(s.starts_with("http://") || s.starts_with("https://") || s.contains("://"))
}
