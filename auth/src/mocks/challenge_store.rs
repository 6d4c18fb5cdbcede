//! Mock MFA challenge store for testing.

use super::lock;
use crate::error::Result;
use crate::providers::{MfaChallenge, MfaChallengeStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock MFA challenge store.
///
/// In-memory implementation for testing. `consume` removes under the
/// lock, so at most one caller ever sees a given challenge.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone, Default)]
pub struct MockChallengeStore {
    challenges: Arc<Mutex<HashMap<String, MfaChallenge>>>,
}

impl MockChallengeStore {
    /// Create a new mock challenge store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending challenges.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.challenges).map(|c| c.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MfaChallengeStore for MockChallengeStore {
    async fn store(&self, challenge_id: &str, challenge: MfaChallenge, _ttl: Duration) -> Result<()> {
        let mut challenges = lock(&self.challenges)?;
        challenges.retain(|_, c| !c.is_expired());
        challenges.insert(challenge_id.to_string(), challenge);
        Ok(())
    }

    async fn consume(&self, challenge_id: &str) -> Result<Option<MfaChallenge>> {
        // Atomic get-and-remove
        let removed = lock(&self.challenges)?.remove(challenge_id);
        Ok(removed.filter(|c| !c.is_expired()))
    }
}
