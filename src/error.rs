//! Error types for Vitrine
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Vitrine
#[derive(Debug, Error)]
pub enum VitrineError {
    /// A URL could not be turned into a resource identifier
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Cache store read/write error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Ledger persistence error
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Network fetch error
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Catalog input could not be read
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Vitrine operations
pub type Result<T> = std::result::Result<T, VitrineError>;
