//! Progress events emitted by the scheduler.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// Progress notifications, one receiver at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A background batch settled.
    BatchCompleted {
        batch: usize,
        loaded: usize,
        failed: usize,
        pending: usize,
    },
    /// The background queue ran empty.
    DrainFinished { loaded: usize, failed: usize },
    /// A promotion settled.
    PromotionFinished {
        requested: usize,
        loaded: usize,
        failed: usize,
    },
    /// One retry round settled.
    RetryRound {
        round: u32,
        attempted: usize,
        recovered: usize,
    },
    /// The retry pass ended.
    RetryFinished { rounds: u32, permanently_failed: usize },
}

#[derive(Debug, Default)]
pub(crate) struct EventSink {
    tx: Mutex<Option<mpsc::UnboundedSender<SchedulerEvent>>>,
}

impl EventSink {
    /// Replace the current subscriber.
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(tx);
        rx
    }

    pub(crate) fn emit(&self, event: SchedulerEvent) {
        let mut slot = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tx) = slot.as_ref()
            && tx.send(event).is_err()
        {
            // receiver dropped
            *slot = None;
        }
    }
}
