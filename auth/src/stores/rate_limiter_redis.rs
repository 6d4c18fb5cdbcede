//! Redis attempt counter for the fixed-window rate limiter.
//!
//! One pipeline per attempt: `INCR`, `EXPIRE … NX` (only the first
//! attempt starts the window) and `PTTL` for the retry hint. The pipeline
//! is `MULTI`/`EXEC`, so the counter can never be left without an expiry.
//!
//! `EXPIRE … NX` needs Redis 7 or later.

use super::redis_error;
use crate::error::Result;
use crate::providers::{AttemptCount, AttemptCounter};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Fixed-window counters in Redis.
#[derive(Clone)]
pub struct RedisAttemptCounter {
    conn_manager: ConnectionManager,
}

impl RedisAttemptCounter {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Ok(Self::from_manager(super::connect(redis_url).await?))
    }

    /// Share an existing connection.
    #[must_use]
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

impl AttemptCounter for RedisAttemptCounter {
    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptCount> {
        let mut conn = self.conn_manager.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);

        let (count, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .arg("NX")
            .ignore()
            .pttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, key = key, "Rate limit pipeline failed");
                redis_error("Failed to count attempt")(e)
            })?;

        Ok(AttemptCount {
            count,
            resets_in: u64::try_from(pttl).ok().map(Duration::from_millis),
        })
    }

    async fn current(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let count: Option<u64> = conn
            .get(key)
            .await
            .map_err(redis_error("Failed to read attempt counter"))?;
        Ok(count.unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(redis_error("Failed to reset attempt counter"))?;
        tracing::debug!(key = key, "Attempt counter reset");
        Ok(())
    }
}
