//! Fixed-window rate limiting for login and registration endpoints.
//!
//! Each `(client ip, endpoint)` pair gets a counter whose window starts on
//! the first attempt. Once the counter exceeds `max_attempts` the pair is
//! rejected until the window expires or the caller resets it.
//!
//! This is a fixed window, not a sliding one: a client can spend its full
//! budget at the end of one window and again at the start of the next.

use crate::config::RateLimitConfig;
use crate::constants::keys;
use crate::error::{AuthError, Result};
use crate::providers::AttemptCounter;

/// Rate limiter over an [`AttemptCounter`].
#[derive(Debug, Clone)]
pub struct RateLimiter<C: AttemptCounter> {
    counter: C,
    config: RateLimitConfig,
}

impl<C: AttemptCounter> RateLimiter<C> {
    /// Create a rate limiter.
    #[must_use]
    pub const fn new(counter: C, config: RateLimitConfig) -> Self {
        Self { counter, config }
    }

    /// Counter key for a client on an endpoint.
    #[must_use]
    pub fn key(endpoint: &str, client_ip: &str) -> String {
        format!("{}{client_ip}:{endpoint}", keys::RATE_LIMIT)
    }

    /// Count an attempt and report whether it is within the limit.
    ///
    /// # Errors
    ///
    /// Returns error if the counter store fails. Callers must treat that
    /// as a rejection.
    pub async fn is_allowed(&self, endpoint: &str, client_ip: &str) -> Result<bool> {
        self.check(endpoint, client_ip).await.map_or_else(
            |e| match e {
                AuthError::RateLimited { .. } => Ok(false),
                other => Err(other),
            },
            |()| Ok(true),
        )
    }

    /// Count an attempt, failing with [`AuthError::RateLimited`] over the limit.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` when the limit is exceeded, or the store error.
    pub async fn check(&self, endpoint: &str, client_ip: &str) -> Result<()> {
        let key = Self::key(endpoint, client_ip);
        let attempt = self.counter.increment(&key, self.config.window).await?;

        if attempt.count > u64::from(self.config.max_attempts) {
            metrics::counter!("auth_rate_limited_total", "endpoint" => endpoint.to_string())
                .increment(1);
            tracing::warn!(
                endpoint = endpoint,
                client_ip = client_ip,
                attempts = attempt.count,
                "Rate limit exceeded"
            );
            return Err(AuthError::RateLimited {
                retry_after: attempt.resets_in.unwrap_or(self.config.window),
            });
        }

        tracing::debug!(endpoint = endpoint, attempts = attempt.count, "Attempt counted");
        Ok(())
    }

    /// Clear the counter, forgiving earlier attempts.
    ///
    /// # Errors
    ///
    /// Returns error if the counter store fails.
    pub async fn reset(&self, endpoint: &str, client_ip: &str) -> Result<()> {
        self.counter.reset(&Self::key(endpoint, client_ip)).await
    }

    /// Attempts left in the current window.
    ///
    /// # Errors
    ///
    /// Returns error if the counter store fails.
    pub async fn remaining_attempts(&self, endpoint: &str, client_ip: &str) -> Result<u32> {
        let used = self
            .counter
            .current(&Self::key(endpoint, client_ip))
            .await?;
        let max = u64::from(self.config.max_attempts);
        Ok(u32::try_from(max.saturating_sub(used)).unwrap_or(0))
    }
}
