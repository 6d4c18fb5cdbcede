//! MFA challenge storage trait.
//!
//! A challenge bridges a successful password check and the second-factor
//! code. It is short-lived and **consumed exactly once**.
//!
//! # Implementation
//!
//! **Production**: `Redis` `SET EX` to store, `GETDEL` to consume.
//! **Testing**: In-memory `HashMap` behind a `Mutex`.

use crate::error::Result;
use crate::state::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A pending second-factor challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaChallenge {
    /// User who passed the first factor.
    pub user_id: UserId,
    /// Whether to issue a refresh token once the code verifies.
    pub remember_me: bool,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

impl MfaChallenge {
    /// Returns `true` if the challenge is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Single-use MFA challenge store.
///
/// # Security Properties
///
/// 1. **Single-use**: `consume()` atomically reads and deletes
/// 2. **Expiration**: entries vanish after their `TTL`
/// 3. **No replay**: concurrent consumers of one id see at most one `Some`
pub trait MfaChallengeStore: Send + Sync {
    /// Store a challenge under `challenge_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn store(
        &self,
        challenge_id: &str,
        challenge: MfaChallenge,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Atomically fetch and delete a challenge.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(challenge))`: first consumption of a live challenge
    /// - `Ok(None)`: unknown, expired or already consumed
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn consume(
        &self,
        challenge_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<MfaChallenge>>> + Send;
}
