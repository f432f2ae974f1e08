//! Outbound request rate limiter.
//!
//! Enforces a minimum interval between dispatches across the whole process.
//! There is normally exactly one caller (the queue worker), but the gate
//! mutex is held across the inter-request sleep so the contract also holds
//! if several tasks call [`RateLimiter::acquire`] concurrently.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Lowest rate `adapt` will back off to, in requests per second.
pub const MIN_ADAPTED_RATE: f64 = 0.25;

/// Minimum-interval rate limiter. A rate of `0` disables limiting.
pub struct RateLimiter {
    /// Requests per second. Separate from the gate so rate changes never
    /// wait behind an in-flight sleep; they take effect on the next dispatch.
    rate: Mutex<f64>,
    gate: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            rate: Mutex::new(rate.max(0.0)),
            gate: tokio::sync::Mutex::new(None),
        }
    }

    /// Current rate in requests per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        *self
            .rate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Sets the rate; clamped to be non-negative.
    pub fn set_rate(&self, rate: f64) {
        let mut guard = self
            .rate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = rate.max(0.0);
    }

    /// Halves the current rate in response to a rate-limit signal, with a
    /// floor of [`MIN_ADAPTED_RATE`]. Returns the new rate.
    pub fn adapt(&self, retry_after: f64) -> f64 {
        let mut guard = self
            .rate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let old = *guard;
        // A disabled limiter (rate 0) stays disabled.
        if old > 0.0 {
            *guard = (old / 2.0).max(MIN_ADAPTED_RATE);
        }
        log::warn!(
            "Rate limited (retry after {retry_after:.0}s): adapting rate {old:.2} -> {:.2} req/s",
            *guard
        );
        *guard
    }

    /// Waits until the next dispatch slot, then claims it.
    pub async fn acquire(&self) {
        let mut last = self.gate.lock().await;
        let rate = self.rate();
        if rate > 0.0 {
            if let Some(previous) = *last {
                let next = previous + Duration::from_secs_f64(1.0 / rate);
                if next > Instant::now() {
                    tokio::time::sleep_until(next).await;
                }
            }
        }
        *last = Some(Instant::now());
    }
}
