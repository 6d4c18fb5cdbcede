//! Attempt counter trait for fixed-window rate limiting.
//!
//! The counter only counts; the policy (how many attempts, what window)
//! lives in [`RateLimiter`](crate::rate_limit::RateLimiter).
//!
//! # Implementation
//!
//! Increment and first-hit expiry must be one atomic step: `Redis`
//! `INCR` + `EXPIRE NX` in a `MULTI` pipeline, or one mutex section in
//! memory. A counter that was incremented but never given an expiry
//! would lock the client out forever.

use crate::error::Result;
use std::time::Duration;

/// Counter state after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCount {
    /// Attempts recorded in the current window, including this one.
    pub count: u64,
    /// Time until the window closes, if known.
    pub resets_in: Option<Duration>,
}

/// Fixed-window attempt counter.
pub trait AttemptCounter: Send + Sync {
    /// Increment `key`, starting a `window`-long expiry on the first hit.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> impl std::future::Future<Output = Result<AttemptCount>> + Send;

    /// Current count for `key` without incrementing (0 if absent).
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn current(&self, key: &str) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Clear `key`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn reset(&self, key: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}
