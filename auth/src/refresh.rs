//! Refresh token issuance and rotation with reuse detection.
//!
//! Every login that asks to be remembered starts a **family**. Rotating
//! the family's active token yields a new token in the same family and
//! marks the old one superseded. Presenting a superseded token again
//! means two parties hold tokens from the same chain, so the whole family
//! is destroyed and the caller gets [`AuthError::ReuseDetected`].
//!
//! # Flow
//!
//! ```text
//! issue(42)      ──▶ A   (family F → A)
//! rotate(A)      ──▶ B   (family F → B, A superseded)
//! rotate(A)      ──▶ ReuseDetected(42, F), family F invalidated
//! rotate(B)      ──▶ TokenExpiredOrUnknown
//! ```

use crate::error::{AuthError, Result};
use crate::providers::{RefreshRecord, RefreshTokenStore, RotateOutcome};
use crate::state::{FamilyId, RotatedToken, UserId};
use crate::utils::generate_token;
use std::time::Duration;

/// Issues, rotates and invalidates refresh tokens.
#[derive(Debug, Clone)]
pub struct RefreshTokenAuthority<S: RefreshTokenStore> {
    store: S,
    ttl: Duration,
}

impl<S: RefreshTokenStore> RefreshTokenAuthority<S> {
    /// Create an authority issuing tokens that live for `ttl`.
    #[must_use]
    pub const fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Start a new family for `user_id` and return its first token.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn issue(&self, user_id: UserId) -> Result<RotatedToken> {
        let record = RefreshRecord {
            user_id,
            family_id: FamilyId::new(),
        };
        let token = generate_token();
        self.store.create_family(&token, record, self.ttl).await?;

        tracing::debug!(user_id = %user_id, family_id = %record.family_id, "Refresh family created");
        Ok(RotatedToken {
            user_id,
            family_id: record.family_id,
            token,
        })
    }

    /// Exchange the family's active token for a new one.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpiredOrUnknown`]: token or family does not exist
    /// - [`AuthError::ReuseDetected`]: token was already rotated; the family
    ///   has been invalidated before this returns
    /// - Store errors
    pub async fn rotate(&self, old_token: &str) -> Result<RotatedToken> {
        let Some(record) = self.store.lookup(old_token).await? else {
            return Err(AuthError::TokenExpiredOrUnknown);
        };

        let new_token = generate_token();
        let outcome = self
            .store
            .compare_and_rotate(old_token, &new_token, record, self.ttl)
            .await?;

        match outcome {
            RotateOutcome::Rotated => {
                tracing::info!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    "Refresh token rotated"
                );
                Ok(RotatedToken {
                    user_id: record.user_id,
                    family_id: record.family_id,
                    token: new_token,
                })
            }
            RotateOutcome::Superseded => {
                metrics::counter!("auth_refresh_reuse_detected_total").increment(1);
                tracing::warn!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    "Refresh token reuse detected, invalidating family"
                );
                if let Err(e) = self.store.invalidate_family(record.family_id).await {
                    metrics::counter!("auth_refresh_invalidation_failures_total").increment(1);
                    tracing::error!(
                        family_id = %record.family_id,
                        error = %e,
                        "Failed to invalidate family after reuse"
                    );
                }
                Err(AuthError::ReuseDetected {
                    user_id: record.user_id,
                    family_id: record.family_id,
                })
            }
            RotateOutcome::FamilyMissing | RotateOutcome::Unknown => {
                tracing::debug!(family_id = %record.family_id, "Rotation against a dead family");
                Err(AuthError::TokenExpiredOrUnknown)
            }
        }
    }

    /// Resolve a token without consuming it.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn peek(&self, token: &str) -> Result<Option<RefreshRecord>> {
        self.store.lookup(token).await
    }

    /// Make every token ever issued in `family_id` unusable.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn invalidate_family(&self, family_id: FamilyId) -> Result<usize> {
        let removed = self.store.invalidate_family(family_id).await?;
        tracing::info!(family_id = %family_id, removed = removed, "Refresh family invalidated");
        Ok(removed)
    }

    /// Logout path: drop the token's whole family.
    ///
    /// Returns the owner if the token was known.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn remove_token_and_family(&self, token: &str) -> Result<Option<UserId>> {
        let Some(record) = self.store.lookup(token).await? else {
            return Ok(None);
        };
        self.invalidate_family(record.family_id).await?;
        Ok(Some(record.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockRefreshTokenStore;
    use std::sync::Arc;

    fn authority() -> RefreshTokenAuthority<MockRefreshTokenStore> {
        RefreshTokenAuthority::new(MockRefreshTokenStore::new(), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_replay_of_rotated_token_is_reuse() {
        let authority = authority();
        let a = authority.issue(UserId(42)).await.unwrap_or_else(|e| panic!("{e}"));

        let b = authority.rotate(&a.token).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(b.family_id, a.family_id);
        assert_ne!(b.token, a.token);

        assert_eq!(
            authority.rotate(&a.token).await,
            Err(AuthError::ReuseDetected {
                user_id: UserId(42),
                family_id: a.family_id,
            })
        );
        assert_eq!(authority.rotate(&b.token).await, Err(AuthError::TokenExpiredOrUnknown));
    }

    #[tokio::test]
    async fn test_reuse_survives_invalidation_failure() {
        let authority = RefreshTokenAuthority::new(
            MockRefreshTokenStore::new().failing_invalidation(),
            Duration::from_secs(3600),
        );
        let a = authority.issue(UserId(9)).await.unwrap_or_else(|e| panic!("{e}"));
        authority.rotate(&a.token).await.unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            authority.rotate(&a.token).await,
            Err(AuthError::ReuseDetected {
                user_id: UserId(9),
                family_id: a.family_id,
            })
        );
    }

    #[tokio::test]
    async fn test_chain_of_rotations() {
        let authority = authority();
        let mut current = authority.issue(UserId(7)).await.unwrap_or_else(|e| panic!("{e}"));

        for _ in 0..5 {
            current = authority
                .rotate(&current.token)
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }
        assert_eq!(current.user_id, UserId(7));
    }

    #[tokio::test]
    async fn test_invalidate_family_kills_every_member() {
        let authority = authority();
        let a = authority.issue(UserId(1)).await.unwrap_or_else(|e| panic!("{e}"));
        let b = authority.rotate(&a.token).await.unwrap_or_else(|e| panic!("{e}"));
        let c = authority.rotate(&b.token).await.unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(authority.invalidate_family(a.family_id).await, Ok(3));
        for token in [&a.token, &b.token, &c.token] {
            assert_eq!(authority.rotate(token).await, Err(AuthError::TokenExpiredOrUnknown));
        }
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let authority = authority();
        assert_eq!(authority.rotate("nope").await, Err(AuthError::TokenExpiredOrUnknown));
        assert_eq!(authority.remove_token_and_family("nope").await, Ok(None));
    }

    #[tokio::test]
    async fn test_families_are_independent() {
        let authority = authority();
        let first = authority.issue(UserId(1)).await.unwrap_or_else(|e| panic!("{e}"));
        let second = authority.issue(UserId(1)).await.unwrap_or_else(|e| panic!("{e}"));
        assert_ne!(first.family_id, second.family_id);

        assert_eq!(
            authority.remove_token_and_family(&first.token).await,
            Ok(Some(UserId(1)))
        );
        assert!(authority.rotate(&second.token).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotation_has_one_winner() {
        let authority = Arc::new(authority());
        let issued = authority.issue(UserId(9)).await.unwrap_or_else(|e| panic!("{e}"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let authority = Arc::clone(&authority);
                let token = issued.token.clone();
                tokio::spawn(async move { authority.rotate(&token).await })
            })
            .collect();

        let mut rotated = 0;
        let mut reused = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => rotated += 1,
                Ok(Err(AuthError::ReuseDetected { .. })) => reused += 1,
                Ok(Err(AuthError::TokenExpiredOrUnknown)) => {}
                other => panic!("unexpected result: {other:?}"),
            }
        }

        assert_eq!(rotated, 1, "exactly one rotation wins");
        assert!(reused >= 1, "losers observe reuse");
    }
}
