//! Fixed-window counters behind [`RateLimiter`].
//!
//! Limiting is fail-open: when the backing counter cannot be reached the
//! request goes through and a warning is logged.

mod redis;

use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

use crate::identity::ports::RateLimiter;

pub use self::redis::RedisRateLimiter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { count: u64 },
    Limited { count: u64 },
    /// The limiter failed; the request is let through.
    Unavailable,
}

impl RateLimitDecision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Limited { .. })
    }
}

/// Count one hit on `key` and compare against `limit` for the current window.
///
/// Every hit asks the backend to start the window if the key has none yet, so
/// a lost `expire` after the first hit is repaired by the next one instead of
/// leaving the counter without a TTL.
pub async fn check(
    limiter: &dyn RateLimiter,
    key: &str,
    limit: u64,
    window: Duration,
) -> RateLimitDecision {
    let count = match limiter.increment(key).await {
        Ok(count) => count,
        Err(err) => {
            warn!(key, "rate limiter unavailable, allowing request: {err:#}");
            return RateLimitDecision::Unavailable;
        }
    };

    if let Err(err) = limiter.expire(key, window).await {
        warn!(key, "failed to set rate limit window: {err:#}");
    }

    if count > limit {
        RateLimitDecision::Limited { count }
    } else {
        RateLimitDecision::Allowed { count }
    }
}

/// Never limits. Used when no counter backend is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn increment(&self, _key: &str) -> Result<u64> {
        Ok(0)
    }

    async fn expire(&self, _key: &str, _window: Duration) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

/// Process-local counters, for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn increment(&self, key: &str) -> Result<u64> {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        counters.retain(|_, counter| !counter.expires_at.is_some_and(|deadline| deadline <= now));

        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        counter.count += 1;
        Ok(counter.count)
    }

    async fn expire(&self, key: &str, window: Duration) -> Result<()> {
        let mut counters = self.counters.lock().await;
        if let Some(counter) = counters.get_mut(key) {
            if counter.expires_at.is_none() {
                counter.expires_at = Some(Instant::now() + window);
            }
        }
        Ok(())
    }
}
