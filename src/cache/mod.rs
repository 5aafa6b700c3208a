//! Cache stores for downloaded image payloads.
//!
//! The store is keyed by [`ResourceId`] and holds opaque bytes. Two
//! implementations are provided:
//! - [`DiskCacheStore`]: a content-addressed on-disk store (cacache),
//!   namespaced so an older cache generation can be purged wholesale.
//! - [`MemoryCacheStore`]: a process-local map, for tests and dry runs.

mod disk;
mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::resource::ResourceId;

pub use disk::{DiskCacheStore, purge_stale_namespaces};
pub use memory::MemoryCacheStore;

/// Keyed payload store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up the payload for `id`.
    async fn get(&self, id: &ResourceId) -> Result<Option<Vec<u8>>>;

    /// Check for an entry without reading its payload.
    async fn contains(&self, id: &ResourceId) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Store (or replace) the payload for `id`.
    async fn put(&self, id: &ResourceId, payload: &[u8]) -> Result<()>;

    /// Remove the entry for `id`. Returns whether one existed.
    async fn delete(&self, id: &ResourceId) -> Result<bool>;
}
