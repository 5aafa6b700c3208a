//! Resource identifiers for product images.
//!
//! A [`ResourceId`] is the normalized image URL used as the key everywhere:
//! in the ledger, in the cache store, and in the download queues.

mod snapshot;

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, VitrineError};

pub use snapshot::catalog_hash;

/// Query parameter carrying the requested image width.
pub const WIDTH_PARAM: &str = "w";
/// Query parameter carrying the requested image quality.
pub const QUALITY_PARAM: &str = "q";

/// Normalized image URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

/// Optional size/quality rewrite applied while normalizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageVariant {
    pub width: Option<u32>,
    pub quality: Option<u8>,
}

impl ImageVariant {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.quality.is_none()
    }
}

impl ResourceId {
    /// Normalize a raw URL without any size/quality rewriting.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::normalize(raw, &ImageVariant::default())
    }

    /// Normalize a raw URL.
    ///
    /// Only http(s) URLs are accepted. The fragment is dropped, the host is
    /// lowercased, and when `variant` is set any existing `w`/`q` parameters
    /// are replaced by the variant's values.
    pub fn normalize(raw: &str, variant: &ImageVariant) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VitrineError::InvalidUrl("empty URL".to_string()));
        }

        let mut url = Url::parse(trimmed).map_err(|e| VitrineError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(VitrineError::InvalidUrl(format!(
                    "unsupported scheme '{}': {}",
                    other, trimmed
                )));
            }
        }
        url.set_fragment(None);

        if !variant.is_empty() {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != WIDTH_PARAM && k != QUALITY_PARAM)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            pairs.extend_pairs(kept.iter());
            if let Some(width) = variant.width {
                pairs.append_pair(WIDTH_PARAM, &width.to_string());
            }
            if let Some(quality) = variant.quality {
                pairs.append_pair(QUALITY_PARAM, &quality.to_string());
            }
        }

        Ok(Self(url.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host component, if the identifier still parses as a URL.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.0)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Host suffixes whose images are worth caching.
///
/// An empty list accepts every host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFilter {
    suffixes: Vec<String>,
}

impl HostFilter {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, id: &ResourceId) -> bool {
        if self.suffixes.is_empty() {
            return true;
        }
        let Some(host) = id.host() else {
            return false;
        };
        self.suffixes
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
    }
}
