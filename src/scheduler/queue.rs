//! Background download queue.
//!
//! One logical worker drains the pending sequence front to back in batches.
//! Fetches inside a batch run concurrently; batches never overlap. Items of a
//! batch that a promotion preempts go back to the front of the queue in their
//! original order.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::Ordering;

use futures::future::join_all;
use log::{debug, info};

use super::events::SchedulerEvent;
use super::ImageScheduler;
use crate::adapter::{EnsureOutcome, with_ledger};
use crate::fetch::FetchPriority;
use crate::resource::ResourceId;

/// Lifecycle of the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    #[default]
    Idle,
    Draining,
    Paused,
}

/// Pending and in-flight identifiers.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    pending: VecDeque<ResourceId>,
    in_flight: Vec<ResourceId>,
    state: QueueState,
}

impl PendingQueue {
    /// Append ids not already pending or in flight. Returns how many were added.
    pub(crate) fn extend(&mut self, ids: impl IntoIterator<Item = ResourceId>) -> usize {
        let mut known: HashSet<ResourceId> = self.pending.iter().chain(self.in_flight.iter()).cloned().collect();
        let mut added = 0;
        for id in ids {
            if known.insert(id.clone()) {
                self.pending.push_back(id);
                added += 1;
            }
        }
        added
    }

    /// Move up to `n` ids from the front into the in-flight set.
    pub(crate) fn take_batch(&mut self, n: usize) -> Vec<ResourceId> {
        let take = n.min(self.pending.len());
        let batch: Vec<ResourceId> = self.pending.drain(..take).collect();
        self.in_flight = batch.clone();
        batch
    }

    /// Settle the in-flight batch, putting `returned` back at the front.
    pub(crate) fn settle(&mut self, returned: Vec<ResourceId>) {
        self.in_flight.clear();
        for id in returned.into_iter().rev() {
            self.pending.push_front(id);
        }
    }

    pub(crate) fn pending(&self) -> &VecDeque<ResourceId> {
        &self.pending
    }

    pub(crate) fn in_flight(&self) -> &[ResourceId] {
        &self.in_flight
    }

    pub(crate) fn state(&self) -> QueueState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: QueueState) {
        self.state = state;
    }
}

/// Why a drain call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue ran empty. `residual_failures` are retryable failures left in the ledger.
    Exhausted { loaded: usize, residual_failures: usize },
    /// A promotion paused the queue; draining resumes when it settles.
    Paused,
    /// Another worker is already draining.
    AlreadyDraining,
    /// The scheduler was shut down.
    Shutdown,
}

impl ImageScheduler {
    /// Drain the background queue until it is empty, paused, or shut down.
    ///
    /// Only one drain runs at a time; a concurrent call returns
    /// [`DrainOutcome::AlreadyDraining`] immediately.
    pub async fn drain(&self) -> DrainOutcome {
        let inner = &self.inner;
        loop {
            if inner.draining.swap(true, Ordering::SeqCst) {
                return DrainOutcome::AlreadyDraining;
            }
            let outcome = self.drain_batches().await;
            inner.draining.store(false, Ordering::SeqCst);

            if outcome != DrainOutcome::Paused {
                if matches!(outcome, DrainOutcome::Exhausted { .. }) {
                    inner.drained.notify_waiters();
                }
                return outcome;
            }
            if self.can_resume() {
                continue;
            }
            // Leave the resume to whichever promotion releases the last hold,
            // unless that already happened while we were publishing.
            inner.interrupted.store(true, Ordering::SeqCst);
            if !inner.gate.is_paused() && inner.interrupted.swap(false, Ordering::SeqCst) {
                continue;
            }
            return outcome;
        }
    }

    fn can_resume(&self) -> bool {
        !self.inner.gate.is_paused() && !self.inner.shutdown.is_cancelled() && self.pending_len() > 0
    }

    async fn drain_batches(&self) -> DrainOutcome {
        let inner = &self.inner;
        let batch_size = inner.config.batch_size.max(1);
        let mut batch_no = 0usize;

        loop {
            if inner.shutdown.is_cancelled() {
                self.with_queue(|q| q.set_state(QueueState::Idle));
                return DrainOutcome::Shutdown;
            }

            let Some(token) = inner.gate.begin_batch(&inner.shutdown) else {
                debug!("Background queue paused with {} pending", self.pending_len());
                self.with_queue(|q| q.set_state(QueueState::Paused));
                return DrainOutcome::Paused;
            };

            let batch = self.with_queue(|q| {
                let batch = q.take_batch(batch_size);
                q.set_state(if batch.is_empty() { QueueState::Idle } else { QueueState::Draining });
                batch
            });

            if batch.is_empty() {
                inner.gate.end_batch();
                let (loaded, failed, residual) = with_ledger(&inner.ledger, |l| {
                    (l.loaded_len(), l.failed_len(), l.retry_candidates(inner.config.retry_ceiling).len())
                });
                info!("Background queue drained: {} loaded, {} failed", loaded, failed);
                inner.events.emit(SchedulerEvent::DrainFinished { loaded, failed });
                return DrainOutcome::Exhausted {
                    loaded,
                    residual_failures: residual,
                };
            }

            batch_no += 1;
            debug!("Starting background batch {} ({} items)", batch_no, batch.len());
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|id| inner.adapter.ensure(id, FetchPriority::Background, &token)),
            )
            .await;
            inner.gate.end_batch();

            let returned: Vec<ResourceId> = batch
                .into_iter()
                .zip(outcomes)
                .filter(|(_, outcome)| *outcome == EnsureOutcome::Cancelled)
                .map(|(id, _)| id)
                .collect();
            if !returned.is_empty() {
                debug!("Returning {} preempted items to the queue", returned.len());
            }
            let pending = self.with_queue(|q| {
                q.settle(returned);
                q.pending().len()
            });

            self.persist_ledger();
            let (loaded, failed) = with_ledger(&inner.ledger, |l| (l.loaded_len(), l.failed_len()));
            inner.events.emit(SchedulerEvent::BatchCompleted {
                batch: batch_no,
                loaded,
                failed,
                pending,
            });

            self.yield_between_batches().await;
        }
    }

    async fn yield_between_batches(&self) {
        let interval = self.inner.config.yield_interval;
        if interval.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.inner.shutdown.cancelled() => {}
        }
    }
}
