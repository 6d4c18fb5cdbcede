//! Redis identity mapping cache.
//!
//! ```text
//! firebase:uid:to:internal:{external_id} → user id
//! firebase:internal:to:uid:{user_id}     → external id
//! ```
//!
//! Both directions are written and removed in one `MULTI`/`EXEC`.

use super::{redis_error, ttl_seconds};
use crate::constants::keys;
use crate::error::Result;
use crate::providers::IdentityMappingCache;
use crate::state::UserId;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Bidirectional external ↔ internal id cache in Redis.
#[derive(Clone)]
pub struct RedisIdentityCache {
    conn_manager: ConnectionManager,
}

impl RedisIdentityCache {
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

    fn forward_key(external_id: &str) -> String {
        format!("{}{external_id}", keys::EXTERNAL_TO_INTERNAL)
    }

    fn reverse_key(user_id: UserId) -> String {
        format!("{}{user_id}", keys::INTERNAL_TO_EXTERNAL)
    }
}

impl IdentityMappingCache for RedisIdentityCache {
    async fn internal_id(&self, external_id: &str) -> Result<Option<UserId>> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .get(Self::forward_key(external_id))
            .await
            .map_err(redis_error("Failed to read identity mapping"))?;

        // An unparseable entry is treated as a miss and refilled from the repository.
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    async fn external_id(&self, user_id: UserId) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.get(Self::reverse_key(user_id))
            .await
            .map_err(redis_error("Failed to read identity mapping"))
    }

    async fn put(&self, external_id: &str, user_id: UserId, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::pipe()
            .atomic()
            .set_ex(Self::forward_key(external_id), user_id.to_string(), ttl_seconds(ttl))
            .ignore()
            .set_ex(Self::reverse_key(user_id), external_id, ttl_seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Failed to cache identity mapping"))?;
        Ok(())
    }

    async fn remove(&self, external_id: &str, user_id: UserId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(Self::forward_key(external_id))
            .ignore()
            .del(Self::reverse_key(user_id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Failed to remove identity mapping"))?;
        Ok(())
    }
}
