//! Mock access session store for testing.

use super::lock;
use crate::error::Result;
use crate::providers::AccessSessionStore;
use crate::state::{AccessSession, UserId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory access session store with per-user index.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone, Default)]
pub struct MockAccessSessionStore {
    sessions: Arc<Mutex<HashMap<String, AccessSession>>>,
}

impl MockAccessSessionStore {
    /// Create a new mock session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live sessions of a user.
    #[must_use]
    pub fn count_for(&self, user_id: UserId) -> usize {
        lock(&self.sessions)
            .map(|s| {
                s.values()
                    .filter(|session| session.user_id == user_id && session.expires_at > Utc::now())
                    .count()
            })
            .unwrap_or(0)
    }
}

impl AccessSessionStore for MockAccessSessionStore {
    async fn create(&self, session: &AccessSession, _ttl: Duration) -> Result<()> {
        lock(&self.sessions)?.insert(session.access_token.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<AccessSession>> {
        Ok(lock(&self.sessions)?
            .get(access_token)
            .filter(|s| s.expires_at > Utc::now())
            .cloned())
    }

    async fn delete(&self, access_token: &str) -> Result<()> {
        lock(&self.sessions)?.remove(access_token);
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: UserId) -> Result<usize> {
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        Ok(before - sessions.len())
    }
}
