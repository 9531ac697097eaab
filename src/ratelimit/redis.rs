use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use tracing::info;

use crate::identity::ports::RateLimiter;

/// Shared counters in Redis: `INCR`, then `EXPIRE ... NX` on every hit so a
/// key never outlives a failed expiry.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
}

impl RedisRateLimiter {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// # Errors
    /// Returns an error if the URL is invalid or Redis is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis");
        let client = redis::Client::open(redis_url).context("invalid Redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn increment(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1).await.context("Redis INCR failed")?;
        Ok(count)
    }

    async fn expire(&self, key: &str, window: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(window.as_secs().max(1)).unwrap_or(i64::MAX);
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .context("Redis EXPIRE failed")?;
        Ok(())
    }
}
