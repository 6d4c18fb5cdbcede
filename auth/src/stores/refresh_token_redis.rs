//! Redis refresh token store.
//!
//! # Layout
//!
//! ```text
//! auth:refresh_token:{token}                → "{user_id}:{family_id}"   (EX ttl)
//! auth:refresh_family:{family_id}           → active token             (EX ttl)
//! auth:refresh_family_members:{family_id}   → SET of every token issued (EX ttl)
//! ```
//!
//! Superseded tokens keep their record until it expires so that a replay
//! can be told apart from an unknown token. Rotation and family
//! invalidation run as Lua scripts, so each is one atomic step on the
//! server.

use super::{redis_error, ttl_seconds, ttl_seconds_i64};
use crate::constants::keys;
use crate::error::Result;
use crate::providers::{RefreshRecord, RefreshTokenStore, RotateOutcome};
use crate::state::FamilyId;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::LazyLock;
use std::time::Duration;

/// KEYS: old token, family, new token, members.
/// ARGV: old token, new token, record, ttl seconds.
static COMPARE_AND_ROTATE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 3
        end
        local active = redis.call('GET', KEYS[2])
        if not active then
            return 2
        end
        if active ~= ARGV[1] then
            return 1
        end
        redis.call('SET', KEYS[3], ARGV[3], 'EX', ARGV[4])
        redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[4])
        redis.call('SADD', KEYS[4], ARGV[2])
        redis.call('EXPIRE', KEYS[4], ARGV[4])
        return 0
        ",
    )
});

/// KEYS: members, family. ARGV: token key prefix.
static INVALIDATE_FAMILY: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local members = redis.call('SMEMBERS', KEYS[1])
        local removed = 0
        for _, token in ipairs(members) do
            removed = removed + redis.call('DEL', ARGV[1] .. token)
        end
        redis.call('DEL', KEYS[1], KEYS[2])
        return removed
        ",
    )
});

/// Refresh token families in Redis.
#[derive(Clone)]
pub struct RedisRefreshTokenStore {
    conn_manager: ConnectionManager,
}

impl RedisRefreshTokenStore {
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

    fn token_key(token: &str) -> String {
        format!("{}{token}", keys::REFRESH_TOKEN)
    }

    fn family_key(family_id: FamilyId) -> String {
        format!("{}{family_id}", keys::REFRESH_FAMILY)
    }

    fn members_key(family_id: FamilyId) -> String {
        format!("{}{family_id}", keys::REFRESH_FAMILY_MEMBERS)
    }
}

impl RefreshTokenStore for RedisRefreshTokenStore {
    async fn create_family(&self, token: &str, record: RefreshRecord, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let members_key = Self::members_key(record.family_id);

        let _: () = redis::pipe()
            .atomic()
            .set_ex(Self::token_key(token), record.encode(), ttl_seconds(ttl))
            .ignore()
            .set_ex(Self::family_key(record.family_id), token, ttl_seconds(ttl))
            .ignore()
            .sadd(&members_key, token)
            .ignore()
            .expire(&members_key, ttl_seconds_i64(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Failed to create refresh token family"))?;

        tracing::debug!(
            user_id = %record.user_id,
            family_id = %record.family_id,
            "Refresh token family created"
        );
        Ok(())
    }

    async fn lookup(&self, token: &str) -> Result<Option<RefreshRecord>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn
            .get(Self::token_key(token))
            .await
            .map_err(redis_error("Failed to look up refresh token"))?;

        Ok(value.as_deref().and_then(|v| {
            let record = RefreshRecord::decode(v);
            if record.is_none() {
                tracing::error!("Malformed refresh token record");
            }
            record
        }))
    }

    async fn compare_and_rotate(
        &self,
        old_token: &str,
        new_token: &str,
        record: RefreshRecord,
        ttl: Duration,
    ) -> Result<RotateOutcome> {
        let mut conn = self.conn_manager.clone();

        let code: i64 = COMPARE_AND_ROTATE
            .key(Self::token_key(old_token))
            .key(Self::family_key(record.family_id))
            .key(Self::token_key(new_token))
            .key(Self::members_key(record.family_id))
            .arg(old_token)
            .arg(new_token)
            .arg(record.encode())
            .arg(ttl_seconds(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error("Failed to rotate refresh token"))?;

        Ok(match code {
            0 => RotateOutcome::Rotated,
            1 => RotateOutcome::Superseded,
            2 => RotateOutcome::FamilyMissing,
            _ => RotateOutcome::Unknown,
        })
    }

    async fn invalidate_family(&self, family_id: FamilyId) -> Result<usize> {
        let mut conn = self.conn_manager.clone();

        let removed: usize = INVALIDATE_FAMILY
            .key(Self::members_key(family_id))
            .key(Self::family_key(family_id))
            .arg(keys::REFRESH_TOKEN)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error("Failed to invalidate refresh token family"))?;

        tracing::info!(family_id = %family_id, removed = removed, "Refresh token family invalidated");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UserId;

    // Requires Redis: docker run -d -p 6379:6379 redis:7-alpine

    async fn store() -> RedisRefreshTokenStore {
        RedisRefreshTokenStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap_or_else(|e| panic!("Failed to create store: {e}"))
    }

    fn record() -> RefreshRecord {
        RefreshRecord {
            user_id: UserId(7),
            family_id: FamilyId::new(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_rotation_and_replay() {
        let store = store().await;
        let record = record();
        let ttl = Duration::from_secs(60);
        let a = uuid::Uuid::new_v4().to_string();
        let b = uuid::Uuid::new_v4().to_string();
        let c = uuid::Uuid::new_v4().to_string();

        store.create_family(&a, record, ttl).await.unwrap();
        assert_eq!(store.lookup(&a).await.unwrap(), Some(record));

        assert_eq!(
            store.compare_and_rotate(&a, &b, record, ttl).await.unwrap(),
            RotateOutcome::Rotated
        );
        assert_eq!(
            store.compare_and_rotate(&a, &c, record, ttl).await.unwrap(),
            RotateOutcome::Superseded
        );

        assert_eq!(store.invalidate_family(record.family_id).await.unwrap(), 2);
        assert_eq!(store.lookup(&b).await.unwrap(), None);
        assert_eq!(
            store.compare_and_rotate(&b, &c, record, ttl).await.unwrap(),
            RotateOutcome::Unknown
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_concurrent_rotation_has_one_winner() {
        let store = store().await;
        let record = record();
        let ttl = Duration::from_secs(60);
        let root = uuid::Uuid::new_v4().to_string();
        store.create_family(&root, record, ttl).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                let root = root.clone();
                tokio::spawn(async move {
                    let next = uuid::Uuid::new_v4().to_string();
                    store.compare_and_rotate(&root, &next, record, ttl).await.unwrap()
                })
            })
            .collect();

        let mut rotated = 0;
        for handle in handles {
            if handle.await.unwrap() == RotateOutcome::Rotated {
                rotated += 1;
            }
        }
        assert_eq!(rotated, 1);
    }
}
