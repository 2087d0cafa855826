//! Client-side admission control.
//!
//! [`TokenBucket`] is a bucket of capacity one: the first request passes
//! immediately and every later request is admitted one interval after the
//! previous admission. Idle time never accumulates into a burst.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::RateLimitError;

/// Gate that blocks until a request may proceed.
///
/// Implementations must allow concurrent waiters. No ordering between
/// waiters is promised beyond what the implementation provides.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits for one token, failing if `cancel` fires first.
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError>;
}

/// Token bucket with capacity 1 and a fixed refill interval.
#[derive(Debug)]
pub struct TokenBucket {
    interval: Duration,
    // Earliest instant at which the next token can be handed out.
    next_slot: Mutex<Option<Instant>>,
}

impl TokenBucket {
    /// Creates a bucket admitting one request per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Creates a bucket admitting `requests_per_minute` evenly spaced requests.
    ///
    /// ```
    /// use std::num::NonZeroU32;
    /// use std::time::Duration;
    /// use tether_http::TokenBucket;
    ///
    /// let bucket = TokenBucket::per_minute(NonZeroU32::new(60).unwrap());
    /// assert_eq!(bucket.interval(), Duration::from_secs(1));
    /// ```
    pub fn per_minute(requests_per_minute: NonZeroU32) -> Self {
        Self::new(Duration::from_secs(60) / requests_per_minute.get())
    }

    /// Minimum spacing between two admissions.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn reserve(&self) -> Instant {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = match *next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        *next_slot = Some(slot + self.interval);
        slot
    }

    // Hands an unused slot back unless someone has reserved after it.
    async fn release(&self, slot: Instant) {
        let mut next_slot = self.next_slot.lock().await;
        if *next_slot == Some(slot + self.interval) {
            *next_slot = Some(slot);
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        if cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }

        let slot = self.reserve().await;
        if slot <= Instant::now() {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            delay_ms = slot.saturating_duration_since(Instant::now()).as_millis() as u64,
            "rate limiter delaying request"
        );

        tokio::select! {
            _ = sleep_until(slot) => Ok(()),
            _ = cancel.cancelled() => {
                self.release(slot).await;
                Err(RateLimitError::Cancelled)
            }
        }
    }
}
