//! Image-cache priority scheduler.
//!
//! [`ImageScheduler`] owns everything the prefetcher needs: the load ledger,
//! the background queue, the pause gate shared with promotions, and the
//! retry pass. It is a cheap handle; clones share the same state, and
//! separate instances are fully independent.
//!
//! # Flow
//!
//! 1. The catalog view calls [`ImageScheduler::enqueue`] once per catalog load.
//! 2. [`ImageScheduler::drain`] downloads the queue in small batches.
//! 3. [`ImageScheduler::promote`] pauses the queue, fetches the visible set
//!    urgently, then resumes draining.
//! 4. [`ImageScheduler::retry_failed`] re-attempts residual failures until
//!    they recover or hit the ceiling.
//!
//! [`ImageScheduler::run`] chains 2 and 4.

mod events;
mod gate;
mod promote;
mod queue;
mod retry;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::adapter::{CacheAdapter, FetchTimeouts, SharedLedger, with_ledger};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::ledger::{LedgerSlot, LoadLedger, ResourceStatus};
use crate::resource::{HostFilter, ImageVariant, ResourceId, catalog_hash};

pub use events::SchedulerEvent;
pub use promote::PromotionReport;
pub use queue::{DrainOutcome, QueueState};
pub use retry::RetryReport;

use gate::PauseGate;
use queue::PendingQueue;

/// Tuning knobs for one scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Items per background batch.
    pub batch_size: usize,
    /// Pause between background batches. Zero yields to the runtime instead.
    pub yield_interval: Duration,
    /// Attempts after which a resource is permanently failed.
    pub retry_ceiling: u32,
    /// Delay before each retry round.
    pub retry_delay: Duration,
    /// Concurrent fetches per retry round.
    pub retry_concurrency: usize,
    pub timeouts: FetchTimeouts,
    pub hosts: HostFilter,
    pub variant: ImageVariant,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            yield_interval: Duration::from_millis(50),
            retry_ceiling: 3,
            retry_delay: Duration::from_secs(2),
            retry_concurrency: 10,
            timeouts: FetchTimeouts::default(),
            hosts: HostFilter::default(),
            variant: ImageVariant::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_yield_interval(mut self, interval: Duration) -> Self {
        self.yield_interval = interval;
        self
    }

    pub fn with_retry(mut self, ceiling: u32, delay: Duration) -> Self {
        self.retry_ceiling = ceiling;
        self.retry_delay = delay;
        self
    }

    pub fn with_hosts(mut self, hosts: HostFilter) -> Self {
        self.hosts = hosts;
        self
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.queue.batch_size,
            yield_interval: Duration::from_millis(config.queue.yield_ms),
            retry_ceiling: config.retry.ceiling,
            retry_delay: Duration::from_millis(config.retry.delay_ms),
            retry_concurrency: config.retry.concurrency,
            timeouts: FetchTimeouts {
                background: Duration::from_millis(config.network.background_timeout_ms),
                urgent: Duration::from_millis(config.network.priority_timeout_ms),
            },
            hosts: HostFilter::new(&config.cache.cacheable_hosts),
            variant: config.images,
        }
    }
}

/// What `enqueue` did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    /// Newly appended to the pending queue.
    pub queued: usize,
    /// Already in the ledger's loaded set.
    pub already_loaded: usize,
    /// At or over the retry ceiling.
    pub permanently_failed: usize,
    /// Rejected by the cacheable-host filter.
    pub filtered: usize,
    /// Whether the catalog's image set differs from the last recorded one.
    pub catalog_changed: bool,
}

/// Point-in-time copy of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: Vec<ResourceId>,
    pub in_flight: Vec<ResourceId>,
    pub state: QueueState,
}

/// Result of [`ImageScheduler::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub drain: DrainOutcome,
    pub retry: Option<RetryReport>,
}

struct Inner {
    config: SchedulerConfig,
    adapter: CacheAdapter,
    ledger: SharedLedger,
    slot: Arc<dyn LedgerSlot>,
    /// Serializes slot writes so an older snapshot never lands last.
    persist: Mutex<()>,
    queue: Mutex<PendingQueue>,
    gate: PauseGate,
    draining: AtomicBool,
    /// Set by a drain that stopped on the gate; the last promotion to release
    /// the gate resumes draining.
    interrupted: AtomicBool,
    drained: Notify,
    shutdown: CancellationToken,
    events: events::EventSink,
}

/// Handle to one image prefetch scheduler.
#[derive(Clone)]
pub struct ImageScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ImageScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageScheduler")
            .field("config", &self.inner.config)
            .field("paused", &self.inner.gate.is_paused())
            .finish_non_exhaustive()
    }
}

impl ImageScheduler {
    /// Build a scheduler, loading the ledger from `slot`.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        slot: Arc<dyn LedgerSlot>,
    ) -> Self {
        let ledger = LoadLedger::load(slot.as_ref());
        debug!(
            "Ledger loaded: {} cached, {} failed",
            ledger.loaded_len(),
            ledger.failed_len()
        );
        let ledger: SharedLedger = Arc::new(Mutex::new(ledger));
        let adapter = CacheAdapter::new(store, fetcher, ledger.clone(), config.timeouts);

        Self {
            inner: Arc::new(Inner {
                config,
                adapter,
                ledger,
                slot,
                persist: Mutex::new(()),
                queue: Mutex::new(PendingQueue::default()),
                gate: PauseGate::new(),
                draining: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                drained: Notify::new(),
                shutdown: CancellationToken::new(),
                events: events::EventSink::default(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn adapter(&self) -> &CacheAdapter {
        &self.inner.adapter
    }

    /// Normalize raw URLs with the configured image variant.
    /// Unparseable URLs are logged and dropped.
    pub fn normalize_urls<S: AsRef<str>>(&self, urls: &[S]) -> Vec<ResourceId> {
        urls.iter()
            .filter_map(|raw| match ResourceId::normalize(raw.as_ref(), &self.inner.config.variant) {
                Ok(id) => Some(id),
                Err(e) => {
                    debug!("Skipping image URL: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Hand the full image set of a freshly loaded catalog to the background queue.
    ///
    /// Loaded and permanently failed ids are skipped, as are ids already
    /// pending or in flight. Does not start draining.
    pub fn enqueue(&self, ids: impl IntoIterator<Item = ResourceId>) -> EnqueueSummary {
        let inner = &self.inner;
        let mut summary = EnqueueSummary::default();
        let mut seen = HashSet::new();
        let mut catalog = Vec::new();

        for id in ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            if !inner.config.hosts.allows(&id) {
                debug!("Not caching {} (host not cacheable)", id);
                summary.filtered += 1;
                continue;
            }
            catalog.push(id);
        }

        let hash = catalog_hash(&catalog);
        let ceiling = inner.config.retry_ceiling;
        let candidates = with_ledger(&inner.ledger, |ledger| {
            summary.catalog_changed = ledger.catalog_hash() != Some(hash.as_str());
            if summary.catalog_changed {
                ledger.set_catalog_hash(hash.clone());
            }
            catalog
                .into_iter()
                .filter(|id| {
                    if ledger.is_loaded(id) {
                        summary.already_loaded += 1;
                        false
                    } else if ledger.is_permanently_failed(id, ceiling) {
                        summary.permanently_failed += 1;
                        false
                    } else {
                        true
                    }
                })
                .collect::<Vec<_>>()
        });
        if summary.catalog_changed {
            self.persist_ledger();
        }

        summary.queued = self.with_queue(|q| q.extend(candidates));
        info!(
            "Enqueued {} images ({} cached, {} permanently failed, {} filtered)",
            summary.queued, summary.already_loaded, summary.permanently_failed, summary.filtered
        );
        summary
    }

    /// Normalize raw URLs and enqueue them.
    pub fn enqueue_urls<S: AsRef<str>>(&self, urls: &[S]) -> EnqueueSummary {
        let ids = self.normalize_urls(urls);
        self.enqueue(ids)
    }

    /// Drain the queue, then retry residual failures.
    ///
    /// If a promotion pauses the drain, waits for the resumed drain to run
    /// the queue dry before retrying.
    pub async fn run(&self) -> RunReport {
        let inner = &self.inner;
        let mut drain = loop {
            let drained = inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            match self.drain().await {
                outcome @ (DrainOutcome::Exhausted { .. } | DrainOutcome::Shutdown) => break outcome,
                DrainOutcome::Paused | DrainOutcome::AlreadyDraining => {
                    debug!("Waiting for the background queue to finish draining");
                    tokio::select! {
                        _ = drained => {}
                        _ = inner.shutdown.cancelled() => break DrainOutcome::Shutdown,
                    }
                    if self.pending_len() > 0 {
                        continue;
                    }
                    break self.exhausted_outcome();
                }
            }
        };

        if let DrainOutcome::Exhausted { residual_failures, .. } = drain
            && residual_failures > 0
        {
            let report = self.retry_failed().await;
            // Counts after retry are more useful to callers.
            drain = self.exhausted_outcome();
            return RunReport {
                drain,
                retry: Some(report),
            };
        }
        RunReport { drain, retry: None }
    }

    fn exhausted_outcome(&self) -> DrainOutcome {
        let ceiling = self.inner.config.retry_ceiling;
        with_ledger(&self.inner.ledger, |l| DrainOutcome::Exhausted {
            loaded: l.loaded_len(),
            residual_failures: l.retry_candidates(ceiling).len(),
        })
    }

    /// Subscribe to progress events. A new subscriber replaces the previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Clear `id` from the ledger so it may be fetched again.
    ///
    /// With `purge_cache`, the cached payload is deleted as well.
    /// The ledger change is persisted even if deleting the payload fails.
    pub async fn forget(&self, id: &ResourceId, purge_cache: bool) -> Result<bool> {
        let known = with_ledger(&self.inner.ledger, |l| l.forget(id));
        let deleted = if purge_cache {
            self.inner.adapter.store().delete(id).await
        } else {
            Ok(false)
        };
        self.persist_ledger();
        let existed = known | deleted?;
        debug!("Forgot {} (known: {})", id, existed);
        Ok(existed)
    }

    pub fn status(&self, id: &ResourceId) -> ResourceStatus {
        with_ledger(&self.inner.ledger, |l| l.status(id, self.inner.config.retry_ceiling))
    }

    pub fn is_loaded(&self, id: &ResourceId) -> bool {
        with_ledger(&self.inner.ledger, |l| l.is_loaded(id))
    }

    /// Copy of the current ledger.
    pub fn ledger_snapshot(&self) -> LoadLedger {
        with_ledger(&self.inner.ledger, |l| l.clone())
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.with_queue(|q| QueueSnapshot {
            pending: q.pending().iter().cloned().collect(),
            in_flight: q.in_flight().to_vec(),
            state: q.state(),
        })
    }

    pub fn pending_len(&self) -> usize {
        self.with_queue(|q| q.pending().len())
    }

    /// Whether any promotion currently holds the background queue.
    pub fn is_paused(&self) -> bool {
        self.inner.gate.is_paused()
    }

    /// Stop draining and retrying. In-flight fetches are abandoned and the
    /// ledger is persisted.
    pub fn shutdown(&self) {
        info!("Shutting down image scheduler");
        self.inner.shutdown.cancel();
        self.persist_ledger();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Snapshot the ledger under its lock, then write outside it.
    fn persist_ledger(&self) {
        let _writing = match self.inner.persist.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let json = with_ledger(&self.inner.ledger, |l| l.to_json());
        match json {
            Ok(json) => {
                if let Err(e) = self.inner.slot.write(&json) {
                    warn!("Failed to save load ledger: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize load ledger: {}", e),
        }
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut PendingQueue) -> R) -> R {
        match self.inner.queue.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}
