//! Priority interrupt channel.
//!
//! A promotion takes a hold on the pause gate, which cancels the background
//! batch in flight, fetches the whole promoted set concurrently at urgent
//! priority, then releases the hold. The promotion that releases the last
//! hold resumes a drain that stopped on the gate.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use futures::future::join_all;
use log::{debug, info};

use super::ImageScheduler;
use super::events::SchedulerEvent;
use crate::adapter::{EnsureOutcome, with_ledger};
use crate::fetch::FetchPriority;
use crate::resource::ResourceId;

/// Outcome of one promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionReport {
    /// Ids that were fetched (or found cached) by this promotion.
    pub loaded: Vec<ResourceId>,
    /// Ids that failed, with the reason.
    pub failed: Vec<(ResourceId, String)>,
    /// Ids skipped because the ledger already had them.
    pub already_loaded: Vec<ResourceId>,
    /// Ids rejected by the cacheable-host filter.
    pub filtered: usize,
}

impl PromotionReport {
    pub fn requested(&self) -> usize {
        self.loaded.len() + self.failed.len()
    }
}

impl ImageScheduler {
    /// Fetch a user-visible set ahead of the background queue.
    ///
    /// Ids already loaded are skipped; if nothing is left, the background
    /// queue is not disturbed.
    pub async fn promote(&self, ids: impl IntoIterator<Item = ResourceId>) -> PromotionReport {
        let inner = &self.inner;
        let mut report = PromotionReport::default();
        let mut seen = HashSet::new();

        let candidates: Vec<ResourceId> = with_ledger(&inner.ledger, |ledger| {
            ids.into_iter()
                .filter(|id| seen.insert(id.clone()))
                .filter(|id| {
                    if !inner.config.hosts.allows(id) {
                        report.filtered += 1;
                        false
                    } else if ledger.is_loaded(id) {
                        report.already_loaded.push(id.clone());
                        false
                    } else {
                        true
                    }
                })
                .collect()
        });

        if candidates.is_empty() {
            debug!("Promotion has nothing to fetch");
            return report;
        }
        if inner.shutdown.is_cancelled() {
            debug!("Promotion ignored after shutdown");
            return report;
        }

        let holds = inner.gate.hold();
        debug!("Promoting {} images (holds: {})", candidates.len(), holds);

        let cancel = inner.shutdown.child_token();
        let outcomes = join_all(
            candidates
                .iter()
                .map(|id| inner.adapter.ensure(id, FetchPriority::Urgent, &cancel)),
        )
        .await;

        for (id, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                EnsureOutcome::AlreadyCached | EnsureOutcome::Downloaded => report.loaded.push(id),
                EnsureOutcome::Failed(reason) => report.failed.push((id, reason)),
                EnsureOutcome::Cancelled => report.failed.push((id, "cancelled".to_string())),
            }
        }
        self.persist_ledger();

        info!(
            "Promotion settled: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        inner.events.emit(SchedulerEvent::PromotionFinished {
            requested: report.requested(),
            loaded: report.loaded.len(),
            failed: report.failed.len(),
        });

        if inner.gate.release() && inner.interrupted.swap(false, Ordering::SeqCst) && !inner.shutdown.is_cancelled() {
            debug!("Resuming background queue");
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.drain().await;
            });
        }

        report
    }

    /// Normalize raw URLs and promote them.
    pub async fn promote_urls<S: AsRef<str>>(&self, urls: &[S]) -> PromotionReport {
        let ids = self.normalize_urls(urls);
        self.promote(ids).await
    }
}
