//! Redis MFA challenge store.
//!
//! Challenges are stored as JSON under `auth:mfa_token:{challenge_id}`
//! with the challenge TTL and consumed with `GETDEL`, so a challenge
//! is handed out at most once even under concurrent verification.

use super::{redis_error, ttl_seconds};
use crate::constants::keys;
use crate::error::{AuthError, Result};
use crate::providers::{MfaChallenge, MfaChallengeStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Single-use MFA challenges in Redis.
#[derive(Clone)]
pub struct RedisChallengeStore {
    conn_manager: ConnectionManager,
}

impl RedisChallengeStore {
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

    fn challenge_key(challenge_id: &str) -> String {
        format!("{}{challenge_id}", keys::MFA_TOKEN)
    }
}

impl MfaChallengeStore for RedisChallengeStore {
    async fn store(&self, challenge_id: &str, challenge: MfaChallenge, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let json = serde_json::to_string(&challenge)
            .map_err(|e| AuthError::SerializationError(e.to_string()))?;

        let _: () = conn
            .set_ex(Self::challenge_key(challenge_id), json, ttl_seconds(ttl))
            .await
            .map_err(redis_error("Failed to store MFA challenge"))?;

        tracing::debug!(user_id = %challenge.user_id, "MFA challenge stored");
        Ok(())
    }

    async fn consume(&self, challenge_id: &str) -> Result<Option<MfaChallenge>> {
        let mut conn = self.conn_manager.clone();

        let json: Option<String> = conn
            .get_del(Self::challenge_key(challenge_id))
            .await
            .map_err(redis_error("Failed to consume MFA challenge"))?;
        let Some(json) = json else {
            return Ok(None);
        };

        let challenge: MfaChallenge = serde_json::from_str(&json)
            .map_err(|e| AuthError::SerializationError(e.to_string()))?;
        if challenge.is_expired() {
            return Ok(None);
        }
        Ok(Some(challenge))
    }
}
