//! Mock identity mapping cache for testing.

use super::lock;
use crate::error::Result;
use crate::providers::IdentityMappingCache;
use crate::state::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Maps {
    to_internal: HashMap<String, UserId>,
    to_external: HashMap<UserId, String>,
}

/// In-memory bidirectional mapping cache. TTLs are ignored.
#[derive(Debug, Clone, Default)]
pub struct MockIdentityCache {
    maps: Arc<Mutex<Maps>>,
    lookups: Arc<Mutex<usize>>,
}

impl MockIdentityCache {
    /// Create a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache reads served so far (hits and misses).
    #[must_use]
    pub fn lookups(&self) -> usize {
        lock(&self.lookups).map(|n| *n).unwrap_or(0)
    }

    fn count_lookup(&self) -> Result<()> {
        *lock(&self.lookups)? += 1;
        Ok(())
    }
}

impl IdentityMappingCache for MockIdentityCache {
    async fn internal_id(&self, external_id: &str) -> Result<Option<UserId>> {
        self.count_lookup()?;
        Ok(lock(&self.maps)?.to_internal.get(external_id).copied())
    }

    async fn external_id(&self, user_id: UserId) -> Result<Option<String>> {
        self.count_lookup()?;
        Ok(lock(&self.maps)?.to_external.get(&user_id).cloned())
    }

    async fn put(&self, external_id: &str, user_id: UserId, _ttl: Duration) -> Result<()> {
        let mut maps = lock(&self.maps)?;
        maps.to_internal.insert(external_id.to_string(), user_id);
        maps.to_external.insert(user_id, external_id.to_string());
        Ok(())
    }

    async fn remove(&self, external_id: &str, user_id: UserId) -> Result<()> {
        let mut maps = lock(&self.maps)?;
        maps.to_internal.remove(external_id);
        maps.to_external.remove(&user_id);
        Ok(())
    }
}
