//! Redis fingerprint store: `auth:token_fingerprint:{access_token}` → hash.

use super::{redis_error, ttl_seconds};
use crate::constants::keys;
use crate::error::Result;
use crate::providers::FingerprintStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Access token fingerprints in Redis.
#[derive(Clone)]
pub struct RedisFingerprintStore {
    conn_manager: ConnectionManager,
}

impl RedisFingerprintStore {
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

    fn fingerprint_key(access_token: &str) -> String {
        format!("{}{access_token}", keys::TOKEN_FINGERPRINT)
    }
}

impl FingerprintStore for RedisFingerprintStore {
    async fn bind(&self, access_token: &str, fingerprint: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set_ex(Self::fingerprint_key(access_token), fingerprint, ttl_seconds(ttl))
            .await
            .map_err(redis_error("Failed to bind fingerprint"))?;
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.get(Self::fingerprint_key(access_token))
            .await
            .map_err(redis_error("Failed to read fingerprint"))
    }

    async fn remove(&self, access_token: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(Self::fingerprint_key(access_token))
            .await
            .map_err(redis_error("Failed to remove fingerprint"))?;
        Ok(())
    }
}
