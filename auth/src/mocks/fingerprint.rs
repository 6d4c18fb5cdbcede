//! Mock fingerprint store for testing.

use super::{expiry, lock};
use crate::error::Result;
use crate::providers::FingerprintStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory fingerprint bindings with expiry.
#[derive(Debug, Clone, Default)]
pub struct MockFingerprintStore {
    bindings: Arc<Mutex<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl MockFingerprintStore {
    /// Create a new mock fingerprint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `access_token` has a live binding.
    #[must_use]
    pub fn is_bound(&self, access_token: &str) -> bool {
        lock(&self.bindings)
            .map(|b| b.get(access_token).is_some_and(|(_, exp)| *exp > Utc::now()))
            .unwrap_or(false)
    }
}

impl FingerprintStore for MockFingerprintStore {
    async fn bind(&self, access_token: &str, fingerprint: &str, ttl: Duration) -> Result<()> {
        lock(&self.bindings)?.insert(
            access_token.to_string(),
            (fingerprint.to_string(), expiry(ttl)),
        );
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<String>> {
        Ok(lock(&self.bindings)?
            .get(access_token)
            .filter(|(_, exp)| *exp > Utc::now())
            .map(|(fp, _)| fp.clone()))
    }

    async fn remove(&self, access_token: &str) -> Result<()> {
        lock(&self.bindings)?.remove(access_token);
        Ok(())
    }
}
