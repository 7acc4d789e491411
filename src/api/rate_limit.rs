//! Global rate limiting for remote API calls.
//!
//! The remote API enforces a calls-per-second ceiling across every endpoint,
//! so unlike per-host limiters there is a single shared gate: a counting
//! semaphore caps the number of in-flight calls at the configured ceiling,
//! and a minimum-interval clock spaces successive call starts.
//!
//! Callers hold the returned permit for the duration of the request so the
//! in-flight count can never exceed the ceiling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Shared rate gate for all remote calls.
///
/// Designed to be wrapped in `Arc` and shared across spawned Tokio tasks.
#[derive(Debug)]
pub struct RateLimiter {
    /// Caps concurrent in-flight calls at the configured ceiling.
    semaphore: Arc<Semaphore>,

    /// Minimum spacing between successive call starts.
    min_interval: Duration,

    /// Start time of the last permitted call.
    /// `None` until the first call, which proceeds immediately.
    last_call: Mutex<Option<Instant>>,

    /// Configured calls-per-second ceiling.
    calls_per_second: usize,
}

impl RateLimiter {
    /// Creates a rate limiter for the given calls-per-second ceiling.
    ///
    /// A ceiling of zero is clamped to one so the limiter can always make
    /// progress.
    #[must_use]
    #[instrument]
    pub fn new(calls_per_second: usize) -> Self {
        let calls_per_second = calls_per_second.max(1);
        debug!(calls_per_second, "creating rate limiter");
        Self {
            semaphore: Arc::new(Semaphore::new(calls_per_second)),
            min_interval: Duration::from_secs(1) / calls_per_second as u32,
            last_call: Mutex::new(None),
            calls_per_second,
        }
    }

    /// Returns the configured calls-per-second ceiling.
    #[must_use]
    pub fn calls_per_second(&self) -> usize {
        self.calls_per_second
    }

    /// Acquires permission to start one remote call.
    ///
    /// Blocks until a concurrency slot is free and the minimum interval since
    /// the previous call start has elapsed. The returned permit must be held
    /// until the call completes; dropping it releases the slot.
    pub async fn acquire(self: &Arc<Self>) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquire cannot fail.
        #[allow(clippy::expect_used)]
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed");

        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval.saturating_sub(elapsed);
                debug!(wait_ms = wait.as_millis(), "spacing rate-limited call");
                tokio::time::sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());
        drop(last_call);

        permit
    }
}
