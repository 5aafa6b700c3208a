//! Load ledger: which images are cached and which have failed.
//!
//! The ledger survives restarts through a [`LedgerSlot`]. Its serialized
//! shape is `{loadedImages, failedImages: [[id, attempts]], lastUpdate}`
//! with an optional `catalogHash`.

mod slot;

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::clock::now_ms;
use crate::error::Result;
use crate::resource::ResourceId;

pub use slot::{FileSlot, LedgerSlot, MemorySlot};

/// Where a resource stands according to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Confirmed present in the cache store.
    Cached,
    /// Failed, but still under the retry ceiling.
    TransientFailure { attempts: u32 },
    /// Reached the retry ceiling; the UI shows a placeholder.
    PermanentFailure { attempts: u32 },
    /// Never attempted.
    Unknown,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerRecord {
    #[serde(default)]
    loaded_images: Vec<ResourceId>,
    #[serde(default)]
    failed_images: Vec<(ResourceId, u32)>,
    #[serde(default)]
    last_update: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalog_hash: Option<String>,
}

/// Durable bookkeeping of cached and failed resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadLedger {
    loaded: HashSet<ResourceId>,
    failed: HashMap<ResourceId, u32>,
    last_update: u64,
    catalog_hash: Option<String>,
}

impl LoadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the slot. Missing or corrupt data yields an empty ledger.
    pub fn load(slot: &dyn LedgerSlot) -> Self {
        let raw = match slot.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No persisted ledger, starting empty");
                return Self::new();
            }
            Err(e) => {
                warn!("Failed to read ledger, starting empty: {}", e);
                return Self::new();
            }
        };

        match serde_json::from_str::<LedgerRecord>(&raw) {
            Ok(record) => Self::from_record(record),
            Err(e) => {
                warn!("Corrupt ledger ignored, starting empty: {}", e);
                Self::new()
            }
        }
    }

    fn from_record(record: LedgerRecord) -> Self {
        let loaded: HashSet<ResourceId> = record.loaded_images.into_iter().collect();
        // An id present in both lists was loaded last; keep it loaded.
        let failed = record
            .failed_images
            .into_iter()
            .filter(|(id, _)| !loaded.contains(id))
            .collect();
        Self {
            loaded,
            failed,
            last_update: record.last_update,
            catalog_hash: record.catalog_hash,
        }
    }

    fn to_record(&self) -> LedgerRecord {
        let mut loaded_images: Vec<ResourceId> = self.loaded.iter().cloned().collect();
        loaded_images.sort();
        let mut failed_images: Vec<(ResourceId, u32)> =
            self.failed.iter().map(|(id, n)| (id.clone(), *n)).collect();
        failed_images.sort();
        LedgerRecord {
            loaded_images,
            failed_images,
            last_update: self.last_update,
            catalog_hash: self.catalog_hash.clone(),
        }
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    /// Serialize into the slot, returning any error.
    pub fn try_save(&self, slot: &dyn LedgerSlot) -> Result<()> {
        slot.write(&self.to_json()?)
    }

    /// Serialize into the slot. Failures are logged and dropped.
    pub fn save(&self, slot: &dyn LedgerSlot) {
        if let Err(e) = self.try_save(slot) {
            warn!("Failed to persist ledger: {}", e);
        }
    }

    pub fn mark_loaded(&mut self, id: &ResourceId) {
        self.failed.remove(id);
        self.loaded.insert(id.clone());
        self.last_update = now_ms();
    }

    /// Record one more failed attempt, returning the new attempt count.
    pub fn mark_failed(&mut self, id: &ResourceId) -> u32 {
        self.loaded.remove(id);
        let attempts = self.failed.entry(id.clone()).or_insert(0);
        *attempts += 1;
        self.last_update = now_ms();
        *attempts
    }

    /// Drop everything known about `id`.
    pub fn forget(&mut self, id: &ResourceId) -> bool {
        let was_loaded = self.loaded.remove(id);
        let was_failed = self.failed.remove(id).is_some();
        if was_loaded || was_failed {
            self.last_update = now_ms();
        }
        was_loaded || was_failed
    }

    pub fn is_loaded(&self, id: &ResourceId) -> bool {
        self.loaded.contains(id)
    }

    pub fn attempts(&self, id: &ResourceId) -> u32 {
        self.failed.get(id).copied().unwrap_or(0)
    }

    pub fn is_permanently_failed(&self, id: &ResourceId, ceiling: u32) -> bool {
        self.failed.get(id).is_some_and(|n| *n >= ceiling)
    }

    pub fn status(&self, id: &ResourceId, ceiling: u32) -> ResourceStatus {
        if self.loaded.contains(id) {
            return ResourceStatus::Cached;
        }
        match self.failed.get(id) {
            Some(&attempts) if attempts >= ceiling => ResourceStatus::PermanentFailure { attempts },
            Some(&attempts) => ResourceStatus::TransientFailure { attempts },
            None => ResourceStatus::Unknown,
        }
    }

    /// Failed ids still under the ceiling, sorted.
    pub fn retry_candidates(&self, ceiling: u32) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .failed
            .iter()
            .filter(|(_, n)| **n < ceiling)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Failed ids at or above the ceiling with their attempt counts, sorted.
    pub fn permanently_failed(&self, ceiling: u32) -> Vec<(ResourceId, u32)> {
        let mut ids: Vec<(ResourceId, u32)> = self
            .failed
            .iter()
            .filter(|(_, n)| **n >= ceiling)
            .map(|(id, n)| (id.clone(), *n))
            .collect();
        ids.sort();
        ids
    }

    pub fn failed(&self) -> &HashMap<ResourceId, u32> {
        &self.failed
    }

    pub fn loaded(&self) -> &HashSet<ResourceId> {
        &self.loaded
    }

    pub fn loaded_len(&self) -> usize {
        self.loaded.len()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    pub fn catalog_hash(&self) -> Option<&str> {
        self.catalog_hash.as_deref()
    }

    pub fn set_catalog_hash(&mut self, hash: impl Into<String>) {
        self.catalog_hash = Some(hash.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(n: u32) -> ResourceId {
        ResourceId::parse(&format!("https://i.ibb.co/p/{}.jpg", n)).unwrap()
    }

    #[test]
    fn test_mark_loaded_removes_from_failed() {
        let mut ledger = LoadLedger::new();
        ledger.mark_failed(&id(1));
        ledger.mark_failed(&id(1));
        assert_eq!(ledger.attempts(&id(1)), 2);

        ledger.mark_loaded(&id(1));
        assert!(ledger.is_loaded(&id(1)));
        assert_eq!(ledger.attempts(&id(1)), 0);
        assert!(!ledger.failed().contains_key(&id(1)));
    }

    #[test]
    fn test_mark_failed_counts_from_one() {
        let mut ledger = LoadLedger::new();
        assert_eq!(ledger.mark_failed(&id(1)), 1);
        assert_eq!(ledger.mark_failed(&id(1)), 2);
        assert_eq!(ledger.mark_failed(&id(2)), 1);
    }

    #[test]
    fn test_mark_failed_clears_loaded() {
        let mut ledger = LoadLedger::new();
        ledger.mark_loaded(&id(1));
        ledger.mark_failed(&id(1));
        assert!(!ledger.is_loaded(&id(1)));
        assert_eq!(ledger.attempts(&id(1)), 1);
    }

    #[test]
    fn test_permanently_failed_at_ceiling() {
        let mut ledger = LoadLedger::new();
        for _ in 0..3 {
            ledger.mark_failed(&id(1));
        }
        ledger.mark_failed(&id(2));

        assert!(ledger.is_permanently_failed(&id(1), 3));
        assert!(!ledger.is_permanently_failed(&id(2), 3));
        assert_eq!(ledger.retry_candidates(3), vec![id(2)]);
        assert_eq!(ledger.permanently_failed(3), vec![(id(1), 3)]);
    }

    #[test]
    fn test_status() {
        let mut ledger = LoadLedger::new();
        ledger.mark_loaded(&id(1));
        ledger.mark_failed(&id(2));
        for _ in 0..5 {
            ledger.mark_failed(&id(3));
        }

        assert_eq!(ledger.status(&id(1), 5), ResourceStatus::Cached);
        assert_eq!(ledger.status(&id(2), 5), ResourceStatus::TransientFailure { attempts: 1 });
        assert_eq!(ledger.status(&id(3), 5), ResourceStatus::PermanentFailure { attempts: 5 });
        assert_eq!(ledger.status(&id(4), 5), ResourceStatus::Unknown);
    }

    #[test]
    fn test_forget() {
        let mut ledger = LoadLedger::new();
        ledger.mark_failed(&id(1));
        assert!(ledger.forget(&id(1)));
        assert!(!ledger.forget(&id(1)));
        assert_eq!(ledger.status(&id(1), 3), ResourceStatus::Unknown);
    }

    #[test]
    fn test_round_trip_through_slot() {
        let slot = MemorySlot::new();
        let mut ledger = LoadLedger::new();
        ledger.mark_loaded(&id(1));
        ledger.mark_loaded(&id(2));
        ledger.mark_failed(&id(3));
        ledger.mark_failed(&id(3));
        ledger.set_catalog_hash("abc");
        ledger.save(&slot);

        let restored = LoadLedger::load(&slot);
        assert_eq!(restored.loaded(), ledger.loaded());
        assert_eq!(restored.failed(), ledger.failed());
        assert_eq!(restored.catalog_hash(), Some("abc"));
        assert_eq!(restored.last_update(), ledger.last_update());
    }

    #[test]
    fn test_round_trip_through_file() {
        let temp = TempDir::new().unwrap();
        let slot = FileSlot::new(temp.path().join("ledger.json"));
        let mut ledger = LoadLedger::new();
        ledger.mark_loaded(&id(7));
        ledger.mark_failed(&id(8));
        ledger.try_save(&slot).unwrap();

        let restored = LoadLedger::load(&slot);
        assert_eq!(restored, ledger);
    }

    #[test]
    fn test_serialized_shape() {
        let slot = MemorySlot::new();
        let mut ledger = LoadLedger::new();
        ledger.mark_loaded(&id(1));
        ledger.mark_failed(&id(2));
        ledger.save(&slot);

        let raw = slot.read().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["loadedImages"][0], "https://i.ibb.co/p/1.jpg");
        assert_eq!(value["failedImages"][0][0], "https://i.ibb.co/p/2.jpg");
        assert_eq!(value["failedImages"][0][1], 1);
        assert!(value["lastUpdate"].as_u64().unwrap() > 0);
        assert!(value.get("catalogHash").is_none());
    }

    #[test]
    fn test_load_accepts_record_without_catalog_hash() {
        let slot = MemorySlot::with_value(
            r#"{"loadedImages":["https://i.ibb.co/a.jpg"],"failedImages":[["https://i.ibb.co/b.jpg",2]],"lastUpdate":1700000000000}"#,
        );
        let ledger = LoadLedger::load(&slot);
        assert_eq!(ledger.loaded_len(), 1);
        assert_eq!(ledger.failed_len(), 1);
        assert_eq!(ledger.last_update(), 1_700_000_000_000);
    }

    #[test]
    fn test_load_corrupt_yields_empty() {
        let slot = MemorySlot::with_value("{not json");
        let ledger = LoadLedger::load(&slot);
        assert_eq!(ledger, LoadLedger::new());
    }

    #[test]
    fn test_load_missing_yields_empty() {
        let slot = MemorySlot::new();
        assert_eq!(LoadLedger::load(&slot), LoadLedger::new());
    }

    #[test]
    fn test_load_resolves_overlap_in_favor_of_loaded() {
        let slot = MemorySlot::with_value(
            r#"{"loadedImages":["https://i.ibb.co/a.jpg"],"failedImages":[["https://i.ibb.co/a.jpg",1]],"lastUpdate":1}"#,
        );
        let ledger = LoadLedger::load(&slot);
        assert!(ledger.is_loaded(&ResourceId::parse("https://i.ibb.co/a.jpg").unwrap()));
        assert_eq!(ledger.failed_len(), 0);
    }
}
