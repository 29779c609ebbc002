//! Disk-backed artwork cache

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::ImageCache,
};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// Downloads artwork once and serves it from `cache_dir` afterwards.
///
/// File names are the SHA-256 of the URL plus the URL's extension, so the same
/// URL always maps to the same path.
pub struct DiskImageCache {
    client: Client,
    cache_dir: PathBuf,
}

impl DiskImageCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
        })
    }

    /// Cache under the platform cache directory.
    pub fn in_default_location() -> Result<Self> {
        let base = dirs::cache_dir()
            .ok_or_else(|| BridgeError::NotAvailable("Platform cache directory".to_string()))?;
        Self::new(base.join("podcore").join("artwork"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path the artwork for `url` is stored at, whether or not it exists yet.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let name = match extension_of(url) {
            Some(ext) => format!("{}.{}", digest, ext),
            None => digest,
        };
        self.cache_dir.join(name)
    }

    async fn download(&self, url: &str, target: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Artwork request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::OperationFailed(format!(
                "Artwork download failed: HTTP {}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Artwork body read failed: {}", e)))?;
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(BridgeError::OperationFailed(format!(
                "Artwork too large: {} bytes",
                bytes.len()
            )));
        }

        self.store(&bytes, target).await?;

        info!(url = %url, path = %target.display(), size = bytes.len(), "Artwork cached");
        Ok(())
    }

    /// Write `bytes` beside `target` and rename into place, so readers never
    /// see a partial file. The temporary file is removed on failure.
    async fn store(&self, bytes: &[u8], target: &Path) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;

        let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
        let partial = target.with_extension(format!("{}-{}.part", std::process::id(), seq));
        let written = async {
            let mut file = fs::File::create(&partial).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            drop(file);
            fs::rename(&partial, target).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!(path = %partial.display(), error = %cleanup, "Partial artwork not removed");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

#[async_trait]
impl ImageCache for DiskImageCache {
    async fn ensure_image_cached(&self, url: &str) -> Result<PathBuf> {
        let target = self.path_for(url);
        if fs::try_exists(&target).await.unwrap_or(false) {
            debug!(url = %url, "Artwork cache hit");
            return Ok(target);
        }

        self.download(url, &target).await?;
        Ok(target)
    }
}
