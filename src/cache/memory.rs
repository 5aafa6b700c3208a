use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::CacheStore;
use crate::error::{Result, VitrineError};
use crate::resource::ResourceId;

/// Process-local cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<ResourceId, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(|e| VitrineError::Cache(e.to_string()))?;
        Ok(entries.get(id).cloned())
    }

    async fn contains(&self, id: &ResourceId) -> Result<bool> {
        let entries = self.entries.lock().map_err(|e| VitrineError::Cache(e.to_string()))?;
        Ok(entries.contains_key(id))
    }

    async fn put(&self, id: &ResourceId, payload: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|e| VitrineError::Cache(e.to_string()))?;
        entries.insert(id.clone(), payload.to_vec());
        Ok(())
    }

    async fn delete(&self, id: &ResourceId) -> Result<bool> {
        let mut entries = self.entries.lock().map_err(|e| VitrineError::Cache(e.to_string()))?;
        Ok(entries.remove(id).is_some())
    }
}
