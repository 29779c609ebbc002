//! Remote progress store over HTTP using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    progress::{RemoteProgress, RemoteProgressStore},
};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

/// JSON progress API client.
///
/// Layout: `{base}/users/{user_id}/progress/{episode_id}`, `GET` to read and
/// `PUT` to upsert. One request per call; retry and backoff belong to the
/// caller's sync worker.
pub struct HttpProgressStore {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl HttpProgressStore {
    /// Create a client with a 15 second request timeout.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("podcore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid progress API URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::OperationFailed(format!(
                "Progress API URL cannot be a base: {}",
                base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Endpoint for one user's progress on one episode. Ids are percent-encoded.
    pub fn endpoint(&self, user_id: &str, episode_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BridgeError::OperationFailed("Progress API URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["users", user_id, "progress", episode_id]);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn transport_error(e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::OperationFailed("Request timed out".to_string())
    } else if e.is_connect() {
        BridgeError::OperationFailed(format!("Connection failed: {}", e))
    } else {
        BridgeError::OperationFailed(e.to_string())
    }
}

fn status_error(status: StatusCode) -> BridgeError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BridgeError::NotAllowed(format!("Progress API refused access: HTTP {}", status.as_u16()))
        }
        _ => BridgeError::OperationFailed(format!("Progress API error: HTTP {}", status.as_u16())),
    }
}

#[async_trait]
impl RemoteProgressStore for HttpProgressStore {
    async fn upsert(&self, user_id: &str, progress: RemoteProgress) -> Result<()> {
        let url = self.endpoint(user_id, &progress.episode_id)?;
        let response = self
            .authorize(self.client.put(url).json(&progress))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), episode_id = %progress.episode_id, "Progress upsert rejected");
            return Err(status_error(status));
        }

        debug!(episode_id = %progress.episode_id, position = progress.position, "Progress upserted");
        Ok(())
    }

    async fn fetch(&self, user_id: &str, episode_id: &str) -> Result<Option<RemoteProgress>> {
        let url = self.endpoint(user_id, episode_id)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let progress = response
                    .json::<RemoteProgress>()
                    .await
                    .map_err(|e| BridgeError::OperationFailed(format!("Invalid progress payload: {}", e)))?;
                Ok(Some(progress))
            }
            status => Err(status_error(status)),
        }
    }
}
