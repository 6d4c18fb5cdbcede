//! Refresh token store trait.
//!
//! Tokens are grouped into families. Each family has exactly one active
//! pointer; every other token that resolves to the family has been
//! superseded by rotation and presenting it again is a replay.
//!
//! # Storage layout
//!
//! ```text
//! auth:refresh_token:{token}               → "{user_id}:{family_id}"
//! auth:refresh_family:{family_id}          → active token
//! auth:refresh_family_members:{family_id}  → { every token issued in the family }
//! ```
//!
//! Superseded tokens stay resolvable until their own TTL runs out so that
//! a replay can be told apart from an unknown token.

use crate::error::Result;
use crate::state::{FamilyId, UserId};
use std::time::Duration;

/// What a refresh token resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRecord {
    /// Owner.
    pub user_id: UserId,
    /// Family the token belongs to.
    pub family_id: FamilyId,
}

impl RefreshRecord {
    /// Encode as `"{user_id}:{family_id}"`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.user_id, self.family_id)
    }

    /// Decode `"{user_id}:{family_id}"`. Returns `None` for malformed values.
    #[must_use]
    pub fn decode(value: &str) -> Option<Self> {
        let (user, family) = value.split_once(':')?;
        Some(Self {
            user_id: user.parse().ok()?,
            family_id: family.parse().ok()?,
        })
    }
}

/// Result of an atomic compare-and-swap rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented token was active; the new token is now active.
    Rotated,
    /// The presented token belongs to the family but is not the active one.
    Superseded,
    /// The family pointer no longer exists (expired or invalidated).
    FamilyMissing,
    /// The presented token is not known.
    Unknown,
}

/// Refresh token and family storage.
///
/// # Security
///
/// **CRITICAL**: `compare_and_rotate()` MUST be a single atomic
/// operation. Under N concurrent rotations of the same active token
/// exactly one returns [`RotateOutcome::Rotated`]; all others return
/// [`RotateOutcome::Superseded`].
///
/// - `Redis`: one Lua script checking the pointer and writing both keys
/// - In-memory: one mutex critical section
pub trait RefreshTokenStore: Send + Sync {
    /// Store the first token of a new family and point the family at it.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn create_family(
        &self,
        token: &str,
        record: RefreshRecord,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Resolve a token without changing anything.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn lookup(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<RefreshRecord>>> + Send;

    /// Replace the family's active pointer `old_token` with `new_token`.
    ///
    /// `record` is what `old_token` resolved to. The new token inherits
    /// the family and gets a fresh `ttl`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn compare_and_rotate(
        &self,
        old_token: &str,
        new_token: &str,
        record: RefreshRecord,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<RotateOutcome>> + Send;

    /// Delete the family pointer and every token issued in the family.
    ///
    /// Returns the number of token entries removed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn invalidate_family(
        &self,
        family_id: FamilyId,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding() {
        let record = RefreshRecord {
            user_id: UserId(42),
            family_id: FamilyId::new(),
        };
        let encoded = record.encode();
        assert!(encoded.starts_with("42:"));
        assert_eq!(RefreshRecord::decode(&encoded), Some(record));
    }

    #[test]
    fn test_record_decoding_rejects_malformed() {
        assert_eq!(RefreshRecord::decode("42"), None);
        assert_eq!(RefreshRecord::decode("abc:not-a-uuid"), None);
        assert_eq!(
            RefreshRecord::decode("x:6f1c1b52-7b7c-4b8e-9a43-0d2f1c6a9e11"),
            None
        );
    }
}
