//! Redis access session store.
//!
//! ```text
//! auth:access_token:{token}            → JSON AccessSession  (EX ttl)
//! auth:user_access_tokens:{user_id}    → SET of live tokens  (EX ttl + 1 day)
//! ```
//!
//! The per-user set lets a refresh token reuse revoke every session of the
//! user in one Lua call. Entries of expired sessions linger in the set until
//! the set itself expires; deleting a missing key is harmless.

use super::{redis_error, ttl_seconds, ttl_seconds_i64};
use crate::constants::keys;
use crate::error::{AuthError, Result};
use crate::providers::AccessSessionStore;
use crate::state::{AccessSession, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::LazyLock;
use std::time::Duration;

const USER_SET_GRACE: Duration = Duration::from_secs(86_400);

/// KEYS: user set. ARGV: access token key prefix.
static DELETE_USER_SESSIONS: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local tokens = redis.call('SMEMBERS', KEYS[1])
        local deleted = 0
        for _, token in ipairs(tokens) do
            deleted = deleted + redis.call('DEL', ARGV[1] .. token)
        end
        redis.call('DEL', KEYS[1])
        return deleted
        ",
    )
});

/// Access sessions in Redis.
#[derive(Clone)]
pub struct RedisAccessSessionStore {
    conn_manager: ConnectionManager,
}

impl RedisAccessSessionStore {
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

    fn session_key(access_token: &str) -> String {
        format!("{}{access_token}", keys::ACCESS_TOKEN)
    }

    fn user_sessions_key(user_id: UserId) -> String {
        format!("{}{user_id}", keys::USER_ACCESS_TOKENS)
    }
}

impl AccessSessionStore for RedisAccessSessionStore {
    async fn create(&self, session: &AccessSession, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let user_key = Self::user_sessions_key(session.user_id);
        let json = serde_json::to_string(session)
            .map_err(|e| AuthError::SerializationError(e.to_string()))?;

        let _: () = redis::pipe()
            .atomic()
            .set_ex(Self::session_key(&session.access_token), json, ttl_seconds(ttl))
            .ignore()
            .sadd(&user_key, &session.access_token)
            .ignore()
            .expire(&user_key, ttl_seconds_i64(ttl.saturating_add(USER_SET_GRACE)))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Failed to create access session"))?;

        tracing::debug!(user_id = %session.user_id, "Access session created");
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<AccessSession>> {
        let mut conn = self.conn_manager.clone();
        let json: Option<String> = conn
            .get(Self::session_key(access_token))
            .await
            .map_err(redis_error("Failed to read access session"))?;

        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| AuthError::SerializationError(e.to_string()))
        })
        .transpose()
    }

    async fn delete(&self, access_token: &str) -> Result<()> {
        let Some(session) = self.get(access_token).await? else {
            return Ok(());
        };

        let mut conn = self.conn_manager.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(Self::session_key(access_token))
            .ignore()
            .srem(Self::user_sessions_key(session.user_id), access_token)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Failed to delete access session"))?;
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: UserId) -> Result<usize> {
        let mut conn = self.conn_manager.clone();
        let deleted: usize = DELETE_USER_SESSIONS
            .key(Self::user_sessions_key(user_id))
            .arg(keys::ACCESS_TOKEN)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error("Failed to delete user sessions"))?;

        tracing::info!(user_id = %user_id, deleted = deleted, "All access sessions deleted");
        Ok(deleted)
    }
}
