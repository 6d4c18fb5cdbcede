//! Storage implementations for the security core.
//!
//! - **Refresh tokens** (Redis): families with atomic compare-and-rotate
//! - **MFA challenges** (Redis): single-use via `GETDEL`
//! - **Attempt counters** (Redis): fixed-window counters
//! - **Fingerprints**, **identity mappings**, **access sessions** (Redis)
//! - **Audit log** (Redis daily lists, optionally `PostgreSQL`)
//! - **Credentials** (`PostgreSQL`)
//!
//! Every Redis store shares one [`ConnectionManager`] per instance and is
//! cheap to clone.

use crate::error::{AuthError, Result};
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;

pub mod audit_redis;
pub mod challenge_redis;
pub mod fanout;
pub mod fingerprint_redis;
pub mod identity_redis;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod rate_limiter_redis;
pub mod refresh_token_redis;
pub mod session_redis;

pub use audit_redis::RedisAuditLog;
pub use challenge_redis::RedisChallengeStore;
pub use fanout::FanoutAuditSink;
pub use fingerprint_redis::RedisFingerprintStore;
pub use identity_redis::RedisIdentityCache;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresAuditLog, PostgresCredentialRepository};
pub use rate_limiter_redis::RedisAttemptCounter;
pub use refresh_token_redis::RedisRefreshTokenStore;
pub use session_redis::RedisAccessSessionStore;

/// Open a managed connection to `redis_url`.
///
/// # Errors
///
/// Returns [`AuthError::ConfigError`] for a malformed URL and
/// [`AuthError::DatabaseError`] if the server is unreachable.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = Client::open(redis_url)
        .map_err(|e| AuthError::ConfigError(format!("Invalid Redis URL: {e}")))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| AuthError::DatabaseError(format!("Failed to connect to Redis: {e}")))
}

/// Redis error mapper carrying the failed step.
pub(crate) fn redis_error(step: &'static str) -> impl Fn(redis::RedisError) -> AuthError {
    move |e| AuthError::DatabaseError(format!("{step}: {e}"))
}

/// Whole seconds for `SET EX` / `EXPIRE`, at least one.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Signed variant of [`ttl_seconds`] for commands taking `i64`.
pub(crate) fn ttl_seconds_i64(ttl: Duration) -> i64 {
    i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_seconds_never_zero() {
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(900)), 900);
        assert_eq!(ttl_seconds_i64(Duration::MAX), i64::MAX);
    }
}
