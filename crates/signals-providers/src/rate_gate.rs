use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::warn;

use crate::error::ProviderError;

/// Bounded concurrency plus a fixed pause after each call before its slot frees up.
#[derive(Debug, Clone)]
pub struct RateGate {
    slots: Arc<Semaphore>,
    delay: Duration,
}

/// A held slot. Dropping it starts the post-call delay; the slot is released
/// once that delay elapses.
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    delay: Duration,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        if self.delay.is_zero() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let delay = self.delay;
                handle.spawn(async move {
                    sleep(delay).await;
                    drop(permit);
                });
            }
            Err(_) => drop(permit),
        }
    }
}

impl RateGate {
    pub fn new(concurrency: usize, delay: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            delay,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<GatePermit, ProviderError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::GateClosed)?;
        Ok(GatePermit {
            permit: Some(permit),
            delay: self.delay,
        })
    }

    /// Run `call` inside a slot. Its result, error or not, is returned unchanged.
    pub async fn run<F, Fut, T>(&self, call: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let _permit = self.acquire().await?;
        call().await
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Tracks the server-reported request weight used in the current minute.
#[derive(Debug)]
pub struct WeightBudget {
    max: u32,
    safe: u32,
    cooldown: Duration,
    state: Mutex<BudgetState>,
}

#[derive(Debug, Default)]
struct BudgetState {
    used: u32,
    blocked_until: Option<Instant>,
}

impl Default for WeightBudget {
    fn default() -> Self {
        Self::new(2400, 2100, Duration::from_secs(5))
    }
}

impl WeightBudget {
    pub fn new(max: u32, safe: u32, cooldown: Duration) -> Self {
        Self {
            max,
            safe,
            cooldown,
            state: Mutex::new(BudgetState::default()),
        }
    }

    pub fn used(&self) -> u32 {
        self.state.lock().used
    }

    /// Record the usage reported alongside a response.
    pub fn observe(&self, used: u32) {
        let mut state = self.state.lock();
        if state.blocked_until.is_none() {
            state.used = used;
        }
    }

    /// Pin the budget as exhausted until `retry_after` has passed.
    pub fn exhaust(&self, retry_after: Duration) {
        let mut state = self.state.lock();
        state.used = self.max + 100;
        state.blocked_until = Some(Instant::now() + retry_after);
        warn!(
            retry_after_secs = retry_after.as_secs(),
            "Request weight exhausted, pausing all callers"
        );
    }

    /// Hold the caller back while the budget is pinned or above the safe threshold.
    pub async fn wait_for_capacity(&self) {
        let blocked = self.state.lock().blocked_until;
        if let Some(until) = blocked {
            sleep_until(until).await;
            let mut state = self.state.lock();
            if state.blocked_until.is_some_and(|u| u <= Instant::now()) {
                state.blocked_until = None;
                state.used = 0;
            }
            return;
        }

        let used = self.used();
        if used >= self.safe {
            warn!(
                used,
                safe = self.safe,
                cooldown_secs = self.cooldown.as_secs(),
                "Request weight near limit, cooling down"
            );
            sleep(self.cooldown).await;
            let mut state = self.state.lock();
            if state.blocked_until.is_none() {
                state.used = self.safe.saturating_sub(100);
            }
        }
    }
}
