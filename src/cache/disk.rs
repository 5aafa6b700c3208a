use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};

use super::CacheStore;
use crate::error::{Result, VitrineError};
use crate::resource::ResourceId;

/// On-disk content-addressed store rooted at `<base>/<namespace>`.
#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    root: PathBuf,
}

impl DiskCacheStore {
    pub fn new(base: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            root: base.as_ref().join(namespace),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<Vec<u8>>> {
        match cacache::read(&self.root, id.as_str()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(e) => Err(VitrineError::Cache(format!("read {}: {}", id, e))),
        }
    }

    async fn contains(&self, id: &ResourceId) -> Result<bool> {
        cacache::metadata(&self.root, id.as_str())
            .await
            .map(|m| m.is_some())
            .map_err(|e| VitrineError::Cache(format!("metadata {}: {}", id, e)))
    }

    async fn put(&self, id: &ResourceId, payload: &[u8]) -> Result<()> {
        cacache::write(&self.root, id.as_str(), payload)
            .await
            .map(|_| ())
            .map_err(|e| VitrineError::Cache(format!("write {}: {}", id, e)))
    }

    async fn delete(&self, id: &ResourceId) -> Result<bool> {
        if !self.contains(id).await? {
            return Ok(false);
        }
        cacache::remove(&self.root, id.as_str())
            .await
            .map_err(|e| VitrineError::Cache(format!("remove {}: {}", id, e)))?;
        Ok(true)
    }
}

/// Delete every namespace directory under `base` except `keep`.
///
/// Returns the names of the removed namespaces. A missing `base` is not an
/// error.
pub fn purge_stale_namespaces(base: impl AsRef<Path>, keep: &str) -> Result<Vec<String>> {
    let base = base.as_ref();
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Cache base {} does not exist, nothing to purge", base.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == keep {
            continue;
        }
        info!("Removing stale cache namespace: {}", name);
        fs::remove_dir_all(entry.path())?;
        removed.push(name);
    }
    removed.sort();
    Ok(removed)
}
