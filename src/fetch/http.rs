//! HTTP fetcher backed by reqwest.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use reqwest::header::HeaderValue;

use super::{FetchError, FetchPriority, Fetcher};
use crate::error::{Result, VitrineError};
use crate::resource::ResourceId;

/// Default user agent
const DEFAULT_USER_AGENT: &str = concat!("vitrine/", env!("CARGO_PKG_VERSION"));

/// reqwest-based [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with an optional user agent override.
    pub fn new(user_agent: Option<&str>) -> Result<Self> {
        let agent = user_agent.unwrap_or(DEFAULT_USER_AGENT);
        let client = Client::builder()
            .user_agent(agent)
            .build()
            .map_err(|e| VitrineError::Fetch(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(std::time::Duration::ZERO)
    } else if let Some(status) = err.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, id: &ResourceId, priority: FetchPriority) -> std::result::Result<Vec<u8>, FetchError> {
        debug!("GET {} ({:?})", id, priority);
        let response = self
            .client
            .get(id.as_str())
            .header("Priority", HeaderValue::from_static(priority.header_value()))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }
}
