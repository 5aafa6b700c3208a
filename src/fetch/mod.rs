//! Network fetch abstraction.
//!
//! The adapter owns timeouts and cancellation; a [`Fetcher`] only has to
//! turn a resource identifier into bytes or a [`FetchError`].

mod http;
mod mock;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::ResourceId;

pub use http::HttpFetcher;
pub use mock::MockFetcher;

/// Who is asking for the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPriority {
    /// Speculative prefetch from the background queue or retry pass.
    Background,
    /// User-visible image: on screen or a search hit.
    Urgent,
}

impl FetchPriority {
    /// Value for the HTTP `Priority` request header (RFC 9218 urgency).
    pub fn header_value(&self) -> &'static str {
        match self {
            FetchPriority::Background => "u=5",
            FetchPriority::Urgent => "u=1",
        }
    }
}

/// Failure of a single fetch attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("cancelled")]
    Cancelled,
}

/// Downloads the payload behind a resource identifier.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, id: &ResourceId, priority: FetchPriority) -> Result<Vec<u8>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_header_values() {
        assert_eq!(FetchPriority::Urgent.header_value(), "u=1");
        assert_eq!(FetchPriority::Background.header_value(), "u=5");
    }

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(FetchError::Status(404).to_string(), "unexpected HTTP status 404");
        assert_eq!(FetchError::Cancelled.to_string(), "cancelled");
        assert!(FetchError::Timeout(Duration::from_secs(8)).to_string().contains("8s"));
    }
}
