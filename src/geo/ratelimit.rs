//! Geocoder rate limiting.
//!
//! The geocoding service's usage policy requires a minimum gap between
//! requests process-wide. The limiter is the single shared mutable point in
//! the engine: concurrent geocode calls from different reports serialize on
//! it. It is injected rather than global so unit tests can substitute
//! [`NoDelayLimiter`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Gate acquired before every call to the geocoding service.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until the next request is allowed.
    async fn acquire(&self);
}

/// Enforces a fixed minimum interval between requests.
///
/// The lock is held across the sleep so concurrent callers queue up rather
/// than racing the clock.
pub struct FixedDelayLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl FixedDelayLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedDelayLimiter {
    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// No-op limiter for tests.
pub struct NoDelayLimiter;

#[async_trait]
impl RateLimiter for NoDelayLimiter {
    async fn acquire(&self) {}
}
