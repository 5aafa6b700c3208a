//! Retry pass over residual failures.
//!
//! Runs rounds until no failed id remains under the ceiling. Each round
//! waits the configured delay first, then re-attempts every candidate with
//! bounded concurrency. Every round either loads a candidate or bumps its
//! attempt count, so the pass always ends.

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use super::ImageScheduler;
use super::events::SchedulerEvent;
use crate::adapter::with_ledger;
use crate::fetch::FetchPriority;
use crate::resource::ResourceId;

/// Outcome of [`ImageScheduler::retry_failed`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Rounds actually run.
    pub rounds: u32,
    /// Ids that loaded during the pass.
    pub recovered: usize,
    /// Ids at or over the ceiling when the pass ended, with attempt counts.
    pub permanently_failed: Vec<(ResourceId, u32)>,
    /// The pass stopped because the scheduler shut down.
    pub cancelled: bool,
}

impl ImageScheduler {
    /// Re-attempt failed ids until they recover or reach the retry ceiling.
    pub async fn retry_failed(&self) -> RetryReport {
        let inner = &self.inner;
        let ceiling = inner.config.retry_ceiling;
        let concurrency = inner.config.retry_concurrency.max(1);
        let mut report = RetryReport::default();

        loop {
            if inner.shutdown.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let candidates = with_ledger(&inner.ledger, |l| l.retry_candidates(ceiling));
            if candidates.is_empty() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(inner.config.retry_delay) => {}
                _ = inner.shutdown.cancelled() => {
                    report.cancelled = true;
                    break;
                }
            }

            report.rounds += 1;
            debug!("Retry round {}: {} candidates", report.rounds, candidates.len());

            let cancel = inner.shutdown.child_token();
            let attempted = candidates.len();
            let outcomes: Vec<_> = stream::iter(candidates)
                .map(|id| {
                    let adapter = inner.adapter.clone();
                    let cancel = cancel.clone();
                    async move { adapter.ensure(&id, FetchPriority::Background, &cancel).await }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
            let recovered = outcomes.iter().filter(|outcome| outcome.is_loaded()).count();
            report.recovered += recovered;
            self.persist_ledger();

            inner.events.emit(SchedulerEvent::RetryRound {
                round: report.rounds,
                attempted,
                recovered,
            });
        }

        report.permanently_failed = with_ledger(&inner.ledger, |l| l.permanently_failed(ceiling));
        for (id, attempts) in &report.permanently_failed {
            warn!("Giving up on {} after {} attempts", id, attempts);
        }
        info!(
            "Retry pass finished after {} rounds: {} recovered, {} permanently failed",
            report.rounds,
            report.recovered,
            report.permanently_failed.len()
        );
        inner.events.emit(SchedulerEvent::RetryFinished {
            rounds: report.rounds,
            permanently_failed: report.permanently_failed.len(),
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::fetch::MockFetcher;
    use crate::ledger::MemorySlot;
    use crate::scheduler::SchedulerConfig;

    fn id(n: u32) -> ResourceId {
        ResourceId::parse(&format!("https://i.ibb.co/{}.jpg", n)).unwrap()
    }

    fn scheduler(ceiling: u32) -> (ImageScheduler, Arc<MockFetcher>) {
        let fetcher = Arc::new(MockFetcher::new());
        let config = SchedulerConfig::default()
            .with_yield_interval(Duration::ZERO)
            .with_retry(ceiling, Duration::from_millis(1));
        let scheduler = ImageScheduler::new(
            config,
            Arc::new(MemoryCacheStore::new()),
            fetcher.clone(),
            Arc::new(MemorySlot::new()),
        );
        (scheduler, fetcher)
    }

    #[tokio::test]
    async fn test_retry_with_no_failures_runs_no_rounds() {
        let (scheduler, fetcher) = scheduler(3);
        let report = scheduler.retry_failed().await;
        assert_eq!(report.rounds, 0);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_stops_at_ceiling() {
        let (scheduler, fetcher) = scheduler(3);
        fetcher.fail_always(&id(1));
        scheduler.enqueue(vec![id(1)]);
        scheduler.drain().await;

        let report = scheduler.retry_failed().await;
        assert_eq!(report.rounds, 2);
        assert_eq!(fetcher.calls_for(&id(1)), 3);
        assert_eq!(report.permanently_failed, vec![(id(1), 3)]);
    }

    #[tokio::test]
    async fn test_retry_skips_ids_already_at_ceiling() {
        let (scheduler, fetcher) = scheduler(3);
        with_ledger(&scheduler.inner.ledger, |l| {
            for _ in 0..3 {
                l.mark_failed(&id(1));
            }
        });

        let report = scheduler.retry_failed().await;
        assert_eq!(report.rounds, 0);
        assert_eq!(fetcher.call_count(), 0);
        assert_eq!(report.permanently_failed, vec![(id(1), 3)]);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failures() {
        let (scheduler, fetcher) = scheduler(5);
        fetcher.fail_times(&id(1), 2);
        scheduler.enqueue(vec![id(1), id(2)]);
        scheduler.drain().await;

        let report = scheduler.retry_failed().await;
        assert_eq!(report.recovered, 1);
        assert_eq!(report.rounds, 2);
        assert!(report.permanently_failed.is_empty());
        assert!(scheduler.is_loaded(&id(1)));
    }

    #[tokio::test]
    async fn test_retry_emits_round_events() {
        let (scheduler, fetcher) = scheduler(2);
        fetcher.fail_always(&id(1));
        scheduler.enqueue(vec![id(1)]);
        scheduler.drain().await;

        let mut rx = scheduler.subscribe();
        scheduler.retry_failed().await;
        assert_eq!(
            rx.recv().await.unwrap(),
            SchedulerEvent::RetryRound {
                round: 1,
                attempted: 1,
                recovered: 0
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SchedulerEvent::RetryFinished {
                rounds: 1,
                permanently_failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_retry_cancelled_by_shutdown() {
        let (scheduler, fetcher) = scheduler(3);
        fetcher.fail_always(&id(1));
        scheduler.enqueue(vec![id(1)]);
        scheduler.drain().await;

        scheduler.shutdown();
        let report = scheduler.retry_failed().await;
        assert!(report.cancelled);
        assert_eq!(fetcher.calls_for(&id(1)), 1);
    }

    #[tokio::test]
    async fn test_retry_runs_on_a_spawned_task() {
        let (scheduler, fetcher) = scheduler(4);
        fetcher.fail_times(&id(1), 1);
        scheduler.enqueue(vec![id(1)]);
        scheduler.drain().await;

        let worker = scheduler.clone();
        let report = tokio::spawn(async move { worker.retry_failed().await }).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert!(scheduler.is_loaded(&id(1)));
    }
}
