//! Bounded-wait lock acquisition on top of a [`LockService`]

use cardvault_core::config::LockConfig;
use cardvault_core::traits::{LockGuard, LockService};
use cardvault_core::{AppError, AppResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Polls a lock until it is free or the wait budget runs out
#[derive(Clone)]
pub struct LockManager {
    locks: Arc<dyn LockService>,
    wait: Duration,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(locks: Arc<dyn LockService>, config: &LockConfig) -> Self {
        Self::with_budget(locks, config.wait(), config.poll_interval())
    }

    pub fn with_budget(locks: Arc<dyn LockService>, wait: Duration, poll_interval: Duration) -> Self {
        Self {
            locks,
            wait,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Acquire `name`, failing with `LockTimeout` once the wait budget is spent
    pub async fn acquire(&self, name: &str, ttl: Duration) -> AppResult<LockGuard> {
        let deadline = Instant::now() + self.wait;

        loop {
            if let Some(guard) = self.locks.try_acquire(name, ttl).await? {
                return Ok(guard);
            }

            if Instant::now() >= deadline {
                warn!(lock = %name, wait_ms = self.wait.as_millis() as u64, "Lock busy, giving up");
                return Err(AppError::LockTimeout(name.to_string()));
            }

            debug!(lock = %name, "Lock busy, waiting");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Release a held lock; failures are logged, the lock then expires on its own
    pub async fn release(&self, guard: &LockGuard) {
        match self.locks.release(guard).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = %guard.key, "Lock expired while held"),
            Err(e) => warn!(lock = %guard.key, error = %e, "Failed to release lock"),
        }
    }

    /// Run `f` while holding `name`
    pub async fn with_lock<T, F, Fut>(&self, name: &str, ttl: Duration, f: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let guard = self.acquire(name, ttl).await?;
        let result = f().await;
        self.release(&guard).await;
        result
    }
}
