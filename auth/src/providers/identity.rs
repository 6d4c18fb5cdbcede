//! Identity mapping cache trait.
//!
//! The cache is never the source of truth; misses fall back to the
//! credential repository.

use crate::error::Result;
use crate::state::UserId;
use std::time::Duration;

/// Bidirectional external id ↔ user id cache.
pub trait IdentityMappingCache: Send + Sync {
    /// Cached user id for an external id.
    ///
    /// # Errors
    ///
    /// Returns error if the cache cannot be reached.
    fn internal_id(
        &self,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<UserId>>> + Send;

    /// Cached external id for a user id.
    ///
    /// # Errors
    ///
    /// Returns error if the cache cannot be reached.
    fn external_id(
        &self,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Upsert both directions with `ttl`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache cannot be reached.
    fn put(
        &self,
        external_id: &str,
        user_id: UserId,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Drop both directions.
    ///
    /// # Errors
    ///
    /// Returns error if the cache cannot be reached.
    fn remove(
        &self,
        external_id: &str,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
