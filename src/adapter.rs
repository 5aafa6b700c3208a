//! Cache store adapter: check, fetch, store, and record in the ledger.
//!
//! [`CacheAdapter::ensure`] never returns an error. Every failure becomes an
//! [`EnsureOutcome::Failed`] plus one more attempt in the ledger, so nothing
//! in the prefetch path can break catalog browsing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::fetch::{FetchError, FetchPriority, Fetcher};
use crate::ledger::LoadLedger;
use crate::resource::ResourceId;

/// Ledger shared between the adapter and the scheduler.
pub type SharedLedger = Arc<Mutex<LoadLedger>>;

/// Run `f` against the shared ledger, recovering from a poisoned lock.
pub(crate) fn with_ledger<R>(ledger: &SharedLedger, f: impl FnOnce(&mut LoadLedger) -> R) -> R {
    match ledger.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => {
            warn!("Ledger lock poisoned, continuing with inner state");
            f(&mut poisoned.into_inner())
        }
    }
}

/// Result of one `ensure` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Entry already in the store; no network request was made.
    AlreadyCached,
    /// Fetched and stored.
    Downloaded,
    /// Fetch or store failed; the ledger attempt count was bumped.
    Failed(String),
    /// Preempted before completion; the ledger was not touched.
    Cancelled,
}

impl EnsureOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, EnsureOutcome::AlreadyCached | EnsureOutcome::Downloaded)
    }
}

/// Per-priority fetch timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub background: Duration,
    pub urgent: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            background: Duration::from_secs(15),
            urgent: Duration::from_secs(8),
        }
    }
}

impl FetchTimeouts {
    pub fn for_priority(&self, priority: FetchPriority) -> Duration {
        match priority {
            FetchPriority::Background => self.background,
            FetchPriority::Urgent => self.urgent,
        }
    }
}

/// Wraps a cache store and a fetcher behind an idempotent `ensure`.
#[derive(Clone)]
pub struct CacheAdapter {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    ledger: SharedLedger,
    timeouts: FetchTimeouts,
}

impl std::fmt::Debug for CacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAdapter")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl CacheAdapter {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        ledger: SharedLedger,
        timeouts: FetchTimeouts,
    ) -> Self {
        Self {
            store,
            fetcher,
            ledger,
            timeouts,
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Make sure `id` is in the cache store.
    ///
    /// Checks the store first and only fetches on a miss. The fetch is
    /// bounded by the priority's timeout and abandoned as soon as `cancel`
    /// fires.
    pub async fn ensure(&self, id: &ResourceId, priority: FetchPriority, cancel: &CancellationToken) -> EnsureOutcome {
        match self.store.contains(id).await {
            Ok(true) => {
                with_ledger(&self.ledger, |l| l.mark_loaded(id));
                return EnsureOutcome::AlreadyCached;
            }
            Ok(false) => {}
            Err(e) => warn!("Cache lookup failed for {}, fetching anyway: {}", id, e),
        }

        if cancel.is_cancelled() {
            return EnsureOutcome::Cancelled;
        }

        let timeout = self.timeouts.for_priority(priority);
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(timeout, self.fetcher.fetch(id, priority)) => {
                result.unwrap_or(Err(FetchError::Timeout(timeout)))
            }
        };

        let payload = match fetched {
            Ok(payload) => payload,
            Err(FetchError::Cancelled) => {
                debug!("Fetch of {} cancelled", id);
                return EnsureOutcome::Cancelled;
            }
            Err(e) => {
                let attempts = with_ledger(&self.ledger, |l| l.mark_failed(id));
                debug!("Fetch of {} failed (attempt {}): {}", id, attempts, e);
                return EnsureOutcome::Failed(e.to_string());
            }
        };

        match self.store.put(id, &payload).await {
            Ok(()) => {
                with_ledger(&self.ledger, |l| l.mark_loaded(id));
                debug!("Cached {} ({} bytes)", id, payload.len());
                EnsureOutcome::Downloaded
            }
            Err(e) => {
                let attempts = with_ledger(&self.ledger, |l| l.mark_failed(id));
                warn!("Failed to store {} (attempt {}): {}", id, attempts, e);
                EnsureOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::fetch::MockFetcher;

    fn id(n: u32) -> ResourceId {
        ResourceId::parse(&format!("https://i.ibb.co/{}.jpg", n)).unwrap()
    }

    fn adapter_with(fetcher: Arc<MockFetcher>, timeouts: FetchTimeouts) -> (CacheAdapter, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new());
        let ledger: SharedLedger = Arc::new(Mutex::new(LoadLedger::new()));
        let adapter = CacheAdapter::new(store.clone(), fetcher, ledger, timeouts);
        (adapter, store)
    }

    #[tokio::test]
    async fn test_ensure_downloads_then_short_circuits() {
        let fetcher = Arc::new(MockFetcher::new());
        let (adapter, store) = adapter_with(fetcher.clone(), FetchTimeouts::default());
        let cancel = CancellationToken::new();

        let first = adapter.ensure(&id(1), FetchPriority::Background, &cancel).await;
        assert_eq!(first, EnsureOutcome::Downloaded);
        assert!(store.contains(&id(1)).await.unwrap());

        let second = adapter.ensure(&id(1), FetchPriority::Background, &cancel).await;
        assert_eq!(second, EnsureOutcome::AlreadyCached);
        assert_eq!(fetcher.calls_for(&id(1)), 1);

        let ledger = adapter.ledger().lock().unwrap();
        assert!(ledger.is_loaded(&id(1)));
        assert!(!ledger.failed().contains_key(&id(1)));
    }

    #[tokio::test]
    async fn test_ensure_already_in_store_marks_loaded() {
        let fetcher = Arc::new(MockFetcher::new());
        let (adapter, store) = adapter_with(fetcher.clone(), FetchTimeouts::default());
        store.put(&id(2), b"warm").await.unwrap();

        let outcome = adapter.ensure(&id(2), FetchPriority::Urgent, &CancellationToken::new()).await;
        assert_eq!(outcome, EnsureOutcome::AlreadyCached);
        assert_eq!(fetcher.call_count(), 0);
        assert!(adapter.ledger().lock().unwrap().is_loaded(&id(2)));
    }

    #[tokio::test]
    async fn test_ensure_failure_bumps_attempts() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.fail_always(&id(3));
        let (adapter, store) = adapter_with(fetcher, FetchTimeouts::default());
        let cancel = CancellationToken::new();

        assert!(matches!(
            adapter.ensure(&id(3), FetchPriority::Background, &cancel).await,
            EnsureOutcome::Failed(_)
        ));
        assert!(matches!(
            adapter.ensure(&id(3), FetchPriority::Background, &cancel).await,
            EnsureOutcome::Failed(_)
        ));
        assert_eq!(adapter.ledger().lock().unwrap().attempts(&id(3)), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_non_success_status_is_failure() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond_status(&id(4), 503);
        let (adapter, store) = adapter_with(fetcher, FetchTimeouts::default());

        let outcome = adapter.ensure(&id(4), FetchPriority::Background, &CancellationToken::new()).await;
        assert_eq!(outcome, EnsureOutcome::Failed("unexpected HTTP status 503".to_string()));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_times_out_by_priority() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.delay(&id(5), Duration::from_millis(200));
        let timeouts = FetchTimeouts {
            background: Duration::from_secs(5),
            urgent: Duration::from_millis(20),
        };
        let (adapter, _store) = adapter_with(fetcher, timeouts);

        let outcome = adapter.ensure(&id(5), FetchPriority::Urgent, &CancellationToken::new()).await;
        assert!(matches!(outcome, EnsureOutcome::Failed(ref reason) if reason.contains("timed out")));
        assert_eq!(adapter.ledger().lock().unwrap().attempts(&id(5)), 1);
    }

    #[tokio::test]
    async fn test_ensure_cancelled_leaves_ledger_untouched() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.delay(&id(6), Duration::from_secs(30));
        let (adapter, store) = adapter_with(fetcher.clone(), FetchTimeouts::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = adapter.ensure(&id(6), FetchPriority::Background, &cancel).await;
        assert_eq!(outcome, EnsureOutcome::Cancelled);
        assert_eq!(adapter.ledger().lock().unwrap().attempts(&id(6)), 0);
        assert!(store.is_empty());
        assert_eq!(fetcher.calls_for(&id(6)), 1);
    }

    #[tokio::test]
    async fn test_ensure_pre_cancelled_skips_fetch() {
        let fetcher = Arc::new(MockFetcher::new());
        let (adapter, _store) = adapter_with(fetcher.clone(), FetchTimeouts::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = adapter.ensure(&id(7), FetchPriority::Background, &cancel).await;
        assert_eq!(outcome, EnsureOutcome::Cancelled);
        assert_eq!(fetcher.call_count(), 0);
    }
}
