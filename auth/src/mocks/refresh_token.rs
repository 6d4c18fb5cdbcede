//! Mock refresh token store for testing.

use super::{expiry, lock};
use crate::error::{AuthError, Result};
use crate::providers::{RefreshRecord, RefreshTokenStore, RotateOutcome};
use crate::state::FamilyId;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    tokens: HashMap<String, (RefreshRecord, DateTime<Utc>)>,
    families: HashMap<FamilyId, (String, DateTime<Utc>)>,
    members: HashMap<FamilyId, HashSet<String>>,
}

impl State {
    fn live_token(&mut self, token: &str) -> Option<RefreshRecord> {
        let expired = match self.tokens.get(token) {
            Some((record, expires_at)) if *expires_at > Utc::now() => return Some(*record),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.tokens.remove(token);
        }
        None
    }

    fn active_token(&mut self, family_id: FamilyId) -> Option<String> {
        let expired = match self.families.get(&family_id) {
            Some((token, expires_at)) if *expires_at > Utc::now() => return Some(token.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.families.remove(&family_id);
        }
        None
    }
}

/// In-memory refresh token store.
///
/// Rotation runs inside one mutex critical section, giving the same
/// compare-and-swap guarantee as the `Redis` Lua script.
///
/// Can simulate a backend that rejects family invalidation
/// (`failing_invalidation`).
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone, Default)]
pub struct MockRefreshTokenStore {
    state: Arc<Mutex<State>>,
    invalidation_fails: Arc<AtomicBool>,
}

impl MockRefreshTokenStore {
    /// Create a new mock refresh token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `invalidate_family` call.
    #[must_use]
    pub fn failing_invalidation(self) -> Self {
        self.invalidation_fails.store(true, Ordering::SeqCst);
        self
    }

    /// Number of token entries currently stored (live or superseded).
    #[must_use]
    pub fn token_count(&self) -> usize {
        lock(&self.state).map(|s| s.tokens.len()).unwrap_or(0)
    }

    /// Active token of a family, if the family is live.
    #[must_use]
    pub fn active_token(&self, family_id: FamilyId) -> Option<String> {
        lock(&self.state).ok()?.active_token(family_id)
    }
}

impl RefreshTokenStore for MockRefreshTokenStore {
    async fn create_family(&self, token: &str, record: RefreshRecord, ttl: Duration) -> Result<()> {
        let mut state = lock(&self.state)?;
        let expires_at = expiry(ttl);

        state.tokens.insert(token.to_string(), (record, expires_at));
        state
            .families
            .insert(record.family_id, (token.to_string(), expires_at));
        state
            .members
            .entry(record.family_id)
            .or_default()
            .insert(token.to_string());
        Ok(())
    }

    async fn lookup(&self, token: &str) -> Result<Option<RefreshRecord>> {
        Ok(lock(&self.state)?.live_token(token))
    }

    async fn compare_and_rotate(
        &self,
        old_token: &str,
        new_token: &str,
        record: RefreshRecord,
        ttl: Duration,
    ) -> Result<RotateOutcome> {
        let mut state = lock(&self.state)?;

        if state.live_token(old_token).is_none() {
            return Ok(RotateOutcome::Unknown);
        }
        let Some(active) = state.active_token(record.family_id) else {
            return Ok(RotateOutcome::FamilyMissing);
        };
        if active != old_token {
            return Ok(RotateOutcome::Superseded);
        }

        let expires_at = expiry(ttl);
        state.tokens.insert(new_token.to_string(), (record, expires_at));
        state
            .families
            .insert(record.family_id, (new_token.to_string(), expires_at));
        state
            .members
            .entry(record.family_id)
            .or_default()
            .insert(new_token.to_string());
        Ok(RotateOutcome::Rotated)
    }

    async fn invalidate_family(&self, family_id: FamilyId) -> Result<usize> {
        if self.invalidation_fails.load(Ordering::SeqCst) {
            return Err(AuthError::DatabaseError("refresh store unavailable".into()));
        }
        let mut state = lock(&self.state)?;

        state.families.remove(&family_id);
        let members = state.members.remove(&family_id).unwrap_or_default();
        let removed = members
            .iter()
            .filter(|token| state.tokens.remove(token.as_str()).is_some())
            .count();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UserId;

    fn record() -> RefreshRecord {
        RefreshRecord {
            user_id: UserId(42),
            family_id: FamilyId::new(),
        }
    }

    #[tokio::test]
    async fn test_rotate_then_replay() {
        let store = MockRefreshTokenStore::new();
        let record = record();
        let ttl = Duration::from_secs(60);
        store.create_family("a", record, ttl).await.unwrap_or(());

        assert_eq!(
            store.compare_and_rotate("a", "b", record, ttl).await.ok(),
            Some(RotateOutcome::Rotated)
        );
        assert_eq!(
            store.compare_and_rotate("a", "c", record, ttl).await.ok(),
            Some(RotateOutcome::Superseded)
        );
        assert_eq!(store.active_token(record.family_id).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_invalidate_removes_every_member() {
        let store = MockRefreshTokenStore::new();
        let record = record();
        let ttl = Duration::from_secs(60);
        store.create_family("a", record, ttl).await.unwrap_or(());
        let _ = store.compare_and_rotate("a", "b", record, ttl).await;

        assert_eq!(store.invalidate_family(record.family_id).await.ok(), Some(2));
        assert_eq!(store.token_count(), 0);
        assert_eq!(
            store.compare_and_rotate("b", "c", record, ttl).await.ok(),
            Some(RotateOutcome::Unknown)
        );
    }

    #[tokio::test]
    async fn test_expired_token_is_unknown() {
        let store = MockRefreshTokenStore::new();
        store.create_family("a", record(), Duration::ZERO).await.unwrap_or(());
        assert_eq!(store.lookup("a").await.ok(), Some(None));
    }
}
