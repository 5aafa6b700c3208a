//! Scripted fetcher for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{FetchError, FetchPriority, Fetcher};
use crate::resource::ResourceId;

#[derive(Debug, Clone)]
enum Script {
    /// Fail every attempt.
    FailAlways,
    /// Fail the next `n` attempts, then succeed.
    FailTimes(u32),
    /// Answer with this HTTP status.
    Status(u16),
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<ResourceId, Script>,
    delays: HashMap<ResourceId, Duration>,
    priority_delays: HashMap<FetchPriority, Duration>,
    calls: Vec<(ResourceId, FetchPriority)>,
}

/// Fetcher with per-resource scripted outcomes and a call log.
///
/// Unscripted resources succeed immediately with a payload derived from the
/// URL.
#[derive(Debug, Default)]
pub struct MockFetcher {
    state: Mutex<MockState>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        match self.state.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Make every fetch of `id` fail.
    pub fn fail_always(&self, id: &ResourceId) {
        self.with_state(|s| s.scripts.insert(id.clone(), Script::FailAlways));
    }

    /// Make the next `times` fetches of `id` fail.
    pub fn fail_times(&self, id: &ResourceId, times: u32) {
        self.with_state(|s| s.scripts.insert(id.clone(), Script::FailTimes(times)));
    }

    /// Answer `id` with a fixed HTTP status.
    pub fn respond_status(&self, id: &ResourceId, status: u16) {
        self.with_state(|s| s.scripts.insert(id.clone(), Script::Status(status)));
    }

    /// Delay responses for `id`.
    pub fn delay(&self, id: &ResourceId, delay: Duration) {
        self.with_state(|s| s.delays.insert(id.clone(), delay));
    }

    /// Delay every response made at `priority`.
    pub fn delay_priority(&self, priority: FetchPriority, delay: Duration) {
        self.with_state(|s| s.priority_delays.insert(priority, delay));
    }

    /// Every fetch issued so far, in call order.
    pub fn calls(&self) -> Vec<(ResourceId, FetchPriority)> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn call_count(&self) -> usize {
        self.with_state(|s| s.calls.len())
    }

    /// Number of fetches issued for `id`.
    pub fn calls_for(&self, id: &ResourceId) -> usize {
        self.with_state(|s| s.calls.iter().filter(|(c, _)| c == id).count())
    }

    /// Wait until at least `n` fetches were issued, or `timeout` elapses.
    pub async fn wait_for_calls(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.call_count() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, id: &ResourceId, priority: FetchPriority) -> Result<Vec<u8>, FetchError> {
        let (delay, outcome) = self.with_state(|s| {
            s.calls.push((id.clone(), priority));
            let delay = s
                .delays
                .get(id)
                .or_else(|| s.priority_delays.get(&priority))
                .copied();
            let outcome = match s.scripts.get_mut(id) {
                Some(Script::FailAlways) => Err(FetchError::Network("scripted failure".to_string())),
                Some(Script::FailTimes(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(FetchError::Network("scripted failure".to_string()))
                }
                Some(Script::Status(code)) => Err(FetchError::Status(*code)),
                _ => Ok(id.as_str().as_bytes().to_vec()),
            };
            (delay, outcome)
        });

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
