//! Per-chain RPC token bucket.
//!
//! One bucket is shared by every adapter on a chain. Calls queue FIFO on
//! the pacing mutex; up to `max_concurrent` run in parallel and dispatches
//! are spaced at least `1000 / requests_per_second` ms apart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::RateLimitSettings;

pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_gap: Duration,
    batch_delay: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let rps = settings.requests_per_second.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            min_gap: Duration::from_millis(1000 / rps as u64),
            batch_delay: Duration::from_millis(settings.batch_delay_ms),
            last_dispatch: Mutex::new(None),
        }
    }

    /// Wait for a dispatch slot. The returned permit caps concurrency for
    /// the duration of the call; drop it when the RPC completes.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed");

        // The mutex queue is FIFO, so waiters are paced in arrival order.
        let mut last = self.last_dispatch.lock().await;
        let now = Instant::now();
        if let Some(previous) = *last {
            let next_allowed = previous + self.min_gap;
            if next_allowed > now {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());

        permit
    }

    /// Pause between consecutive multicall batches.
    pub async fn batch_pause(&self) {
        tokio::time::sleep(self.batch_delay).await;
    }
}
