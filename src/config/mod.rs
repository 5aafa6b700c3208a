//! Configuration for vitrine.
//!
//! Loaded from `--config`, `./.vitrine.yml`, or `~/.config/vitrine/vitrine.yml`,
//! falling back to defaults.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::resource::ImageVariant;

/// Default cache namespace. Bump it to invalidate every cached image.
pub const DEFAULT_NAMESPACE: &str = "images-v1";

/// Generic product placeholder shown until (or instead of) the real image.
pub const DEFAULT_PLACEHOLDER_SRC: &str = "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' width='400' height='400' viewBox='0 0 400 400'%3E%3Crect fill='%23f3f4f6' width='400' height='400'/%3E%3Ctext x='50%25' y='50%25' dominant-baseline='middle' text-anchor='middle' font-family='Arial, sans-serif' font-size='18' fill='%239ca3af'%3EProduct%3C/text%3E%3C/svg%3E";

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vitrine")
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when RUST_LOG is not set.
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// On-disk cache store.
    pub cache: CacheConfig,

    /// Ledger persistence.
    pub ledger: LedgerConfig,

    /// Background queue pacing.
    pub queue: QueueConfig,

    /// HTTP settings.
    pub network: NetworkConfig,

    /// Retry pass.
    pub retry: RetryConfig,

    /// Size/quality rewriting of image URLs.
    pub images: ImageVariant,

    /// Viewport trigger.
    pub viewport: ViewportConfig,
}

impl Config {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .vitrine.yml in current directory
    /// 3. ~/.config/vitrine/vitrine.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".vitrine.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .vitrine.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .vitrine.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("vitrine").join("vitrine.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.queue.batch_size == 0 {
            eyre::bail!("queue.batch-size must be > 0");
        }
        if self.retry.concurrency == 0 {
            eyre::bail!("retry.concurrency must be > 0");
        }
        if self.retry.ceiling == 0 {
            eyre::bail!("retry.ceiling must be > 0");
        }
        if self.cache.namespace.trim().is_empty() {
            eyre::bail!("cache.namespace must not be empty");
        }
        if let Some(quality) = self.images.quality
            && !(1..=100).contains(&quality)
        {
            eyre::bail!("images.quality must be between 1 and 100");
        }
        Ok(())
    }
}

/// On-disk cache store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base directory; each namespace is a subdirectory.
    pub dir: PathBuf,

    /// Current cache generation.
    pub namespace: String,

    /// Host suffixes worth caching. Empty caches every host.
    #[serde(rename = "cacheable-hosts")]
    pub cacheable_hosts: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("vitrine"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            cacheable_hosts: Vec::new(),
        }
    }
}

/// Ledger persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("ledger.json"),
        }
    }
}

/// Background queue pacing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Images fetched concurrently per batch.
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Pause between batches in milliseconds. 0 only yields to the runtime.
    #[serde(rename = "yield-ms")]
    pub yield_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            yield_ms: 50,
        }
    }
}

/// HTTP settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Timeout for background and retry fetches in milliseconds.
    #[serde(rename = "background-timeout-ms")]
    pub background_timeout_ms: u64,

    /// Timeout for promoted fetches in milliseconds.
    #[serde(rename = "priority-timeout-ms")]
    pub priority_timeout_ms: u64,

    #[serde(rename = "user-agent")]
    pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            background_timeout_ms: 15_000,
            priority_timeout_ms: 8_000,
            user_agent: None,
        }
    }
}

/// Retry pass settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts after which an image is permanently failed.
    pub ceiling: u32,

    /// Delay before each retry round in milliseconds.
    #[serde(rename = "delay-ms")]
    pub delay_ms: u64,

    /// Concurrent fetches per round.
    pub concurrency: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            ceiling: 3,
            delay_ms: 2_000,
            concurrency: 10,
        }
    }
}

/// Viewport trigger settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Lookahead around the visible area in pixels.
    #[serde(rename = "margin-px")]
    pub margin_px: u32,

    /// Image shown while loading and on failure.
    #[serde(rename = "placeholder-src")]
    pub placeholder_src: String,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            margin_px: 100,
            placeholder_src: DEFAULT_PLACEHOLDER_SRC.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.yield_ms, 50);
        assert_eq!(config.retry.ceiling, 3);
        assert_eq!(config.network.priority_timeout_ms, 8_000);
        assert_eq!(config.cache.namespace, DEFAULT_NAMESPACE);
        assert!(config.images.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = Config {
            queue: QueueConfig {
                batch_size: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            images: ImageVariant {
                width: None,
                quality: Some(0),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
cache:
  namespace: images-v2
  cacheable-hosts: [ibb.co]
queue:
  batch-size: 4
retry:
  ceiling: 5
images:
  width: 400
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cache.namespace, "images-v2");
        assert_eq!(config.cache.cacheable_hosts, vec!["ibb.co".to_string()]);
        assert_eq!(config.queue.batch_size, 4);
        assert_eq!(config.retry.ceiling, 5);
        assert_eq!(config.images.width, Some(400));
        // Other fields should have defaults
        assert_eq!(config.queue.yield_ms, 50);
        assert_eq!(config.viewport.margin_px, 100);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vitrine.yml");
        fs::write(&path, "retry:\n  delay-ms: 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.retry.delay_ms, 10);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
