//! Fixed-window rate limiting on top of the cache's atomic counter.
//!
//! The first attempt in a window creates a counter that expires with the
//! window; later attempts increment it. Backend failures fail open so a
//! cache outage never silences chat.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::domain::Error;
use crate::domain::ports::{CacheKey, CacheStore};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Attempts counted in the current window, including this one.
    pub attempts: u32,
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
    /// Set when the backing store failed and the check failed open.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0);
        (millis + 999) / 1000
    }

    /// Rejection surfaced to callers that exceeded the limit.
    pub fn to_error(&self, now: DateTime<Utc>) -> Error {
        let retry_after = self.retry_after_seconds(now);
        Error::rate_limited(format!(
            "Too many messages. Please try again in {retry_after} seconds."
        ))
        .with_details(json!({
            "attempts": self.attempts,
            "remaining": self.remaining,
            "retryAfterSeconds": retry_after,
            "resetAt": self.reset_at,
        }))
    }
}

/// Counter-based limiter keyed by caller-chosen cache keys.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Fixed-window limiter keeping its counters in `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Count an attempt against `key`, allowing at most `max_attempts` per
    /// `window`.
    pub async fn check(
        &self,
        key: &CacheKey,
        max_attempts: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let now = self.clock.utc();
        let nominal_reset = later(now, window);

        let attempts = match self.cache.increment(key, window).await {
            Ok(count) => u32::try_from(count.max(1)).unwrap_or(u32::MAX),
            Err(err) => {
                warn!(key = %key, error = %err, "rate limiter backend failed; allowing");
                return RateLimitDecision {
                    allowed: true,
                    attempts: 1,
                    remaining: max_attempts.saturating_sub(1),
                    reset_at: nominal_reset,
                    degraded: true,
                };
            }
        };

        if attempts <= max_attempts {
            return RateLimitDecision {
                allowed: true,
                attempts,
                remaining: max_attempts - attempts,
                reset_at: nominal_reset,
                degraded: false,
            };
        }

        let reset_at = match self.cache.time_to_live(key).await {
            Ok(Some(ttl)) => later(now, ttl),
            Ok(None) => nominal_reset,
            Err(err) => {
                warn!(key = %key, error = %err, "rate limit ttl unreadable; using window");
                nominal_reset
            }
        };
        RateLimitDecision {
            allowed: false,
            attempts,
            remaining: 0,
            reset_at,
            degraded: false,
        }
    }
}

fn later(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
