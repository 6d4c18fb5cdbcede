//! Access session store trait.
//!
//! Access tokens are opaque; the store maps each to its owner and keeps a
//! per-user index so every session of a user can be revoked at once
//! (forced after refresh token reuse).

use crate::error::Result;
use crate::state::{AccessSession, UserId};
use std::time::Duration;

/// Access session storage.
pub trait AccessSessionStore: Send + Sync {
    /// Store a session for `ttl` and index it under its user.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn create(
        &self,
        session: &AccessSession,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Look up a live session.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn get(
        &self,
        access_token: &str,
    ) -> impl std::future::Future<Output = Result<Option<AccessSession>>> + Send;

    /// Delete one session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn delete(&self, access_token: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete every session of `user_id` atomically. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn delete_user_sessions(
        &self,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}
