//! Fingerprint binding storage trait.

use crate::error::Result;
use std::time::Duration;

/// Access token → client fingerprint hash, with TTL.
pub trait FingerprintStore: Send + Sync {
    /// Bind `fingerprint` to `access_token` for `ttl`. Overwrites.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn bind(
        &self,
        access_token: &str,
        fingerprint: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Bound fingerprint, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn get(
        &self,
        access_token: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Remove the binding. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn remove(&self, access_token: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}
