//! Reference-counted pause gate between background draining and promotions.
//!
//! Each promotion takes a hold; the background queue may only start a batch
//! while no hold is outstanding. Taking a hold cancels the batch currently in
//! flight. Registering a batch and taking a hold happen under the same lock,
//! so a batch either starts before the hold (and is cancelled by it) or sees
//! the hold and never starts.

use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct GateState {
    holds: usize,
    batch: Option<CancellationToken>,
}

#[derive(Debug, Default)]
pub(crate) struct PauseGate {
    state: Mutex<GateState>,
}

impl PauseGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a hold, cancelling any background batch in flight.
    /// Returns the number of holds now outstanding.
    pub(crate) fn hold(&self) -> usize {
        let mut state = self.lock();
        state.holds += 1;
        if let Some(batch) = state.batch.take() {
            batch.cancel();
        }
        state.holds
    }

    /// Release a hold. Returns true when this was the last one.
    pub(crate) fn release(&self) -> bool {
        let mut state = self.lock();
        state.holds = state.holds.saturating_sub(1);
        state.holds == 0
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.lock().holds > 0
    }

    /// Register a background batch. Returns `None` while paused.
    pub(crate) fn begin_batch(&self, parent: &CancellationToken) -> Option<CancellationToken> {
        let mut state = self.lock();
        if state.holds > 0 {
            return None;
        }
        let token = parent.child_token();
        state.batch = Some(token.clone());
        Some(token)
    }

    pub(crate) fn end_batch(&self) {
        self.lock().batch = None;
    }
}
