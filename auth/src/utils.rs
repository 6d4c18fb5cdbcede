//! Utility functions shared by the security components.

use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Generate an opaque random token (UUID v4, 122 bits of randomness).
#[must_use]
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Run a store or identity provider call with an upper time bound.
///
/// Expiry is reported as [`AuthError::Timeout`]; callers treat it as a
/// hard failure and never retry in place.
///
/// # Errors
///
/// Returns the inner error, or `Timeout` if `limit` elapses first.
pub async fn with_timeout<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                operation = operation,
                timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "Security store call timed out, failing closed"
            );
            Err(AuthError::Timeout { operation })
        }
    }
}

/// Absolute expiry for a TTL starting now. Saturates instead of overflowing.
#[must_use]
pub fn expires_after(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Truncate to at most `max_chars` characters, respecting UTF-8 boundaries.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

/// Basic email shape check.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// Local part of an email address (`alice` for `alice@example.com`).
#[must_use]
pub fn email_local_part(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_email_helpers() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("al ice@example.com"));
        assert_eq!(email_local_part("alice@example.com"), "alice");
    }

    #[tokio::test]
    async fn test_with_timeout_fails_closed() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, AuthError>(1)
        };
        let result = with_timeout(Duration::from_millis(10), "slow_store", slow).await;
        assert_eq!(result, Err(AuthError::Timeout { operation: "slow_store" }));

        let fast = async { Ok::<_, AuthError>(2) };
        assert_eq!(with_timeout(Duration::from_secs(1), "fast", fast).await, Ok(2));
    }

    proptest::proptest! {
        #[test]
        fn prop_truncate_chars_is_a_prefix(value in "\\PC{0,64}", max in 0usize..80) {
            let truncated = truncate_chars(&value, max);
            proptest::prop_assert!(value.starts_with(&truncated));
            proptest::prop_assert_eq!(truncated.chars().count(), value.chars().count().min(max));
        }
    }
}
