//! Federated identity ↔ internal user id mapping.
//!
//! The credential repository is the source of truth; the cache only
//! saves a repository round trip per federated request. Misses fall
//! through to the repository and a hit there populates both directions.

use crate::context::TenantScope;
use crate::error::Result;
use crate::providers::{CredentialRepository, IdentityMappingCache};
use crate::state::UserId;
use std::time::Duration;

/// Cache-aside mapper between external ids and user ids.
#[derive(Debug, Clone)]
pub struct IdentityMapper<M: IdentityMappingCache, R: CredentialRepository> {
    cache: M,
    credentials: R,
    ttl: Duration,
}

impl<M: IdentityMappingCache, R: CredentialRepository> IdentityMapper<M, R> {
    /// Create a mapper whose cache entries live for `ttl`.
    #[must_use]
    pub const fn new(cache: M, credentials: R, ttl: Duration) -> Self {
        Self {
            cache,
            credentials,
            ttl,
        }
    }

    /// Internal user for a federated subject.
    ///
    /// # Errors
    ///
    /// Returns error if the cache or the repository fails.
    pub async fn internal_id(&self, external_id: &str) -> Result<Option<UserId>> {
        if let Some(user_id) = self.cache.internal_id(external_id).await? {
            return Ok(Some(user_id));
        }

        let found = self
            .credentials
            .find_by_external_id(TenantScope::CrossTenant, external_id)
            .await?;
        let Some(credential) = found else {
            return Ok(None);
        };

        self.create_mapping(external_id, credential.user_id).await?;
        Ok(Some(credential.user_id))
    }

    /// Federated subject linked to an internal user.
    ///
    /// # Errors
    ///
    /// Returns error if the cache or the repository fails.
    pub async fn external_id(&self, user_id: UserId) -> Result<Option<String>> {
        if let Some(external_id) = self.cache.external_id(user_id).await? {
            return Ok(Some(external_id));
        }

        let found = self
            .credentials
            .find_by_id(TenantScope::CrossTenant, user_id)
            .await?;
        let Some(external_id) = found.and_then(|c| c.external_id) else {
            return Ok(None);
        };

        self.create_mapping(&external_id, user_id).await?;
        Ok(Some(external_id))
    }

    /// Cache both directions. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the cache fails.
    pub async fn create_mapping(&self, external_id: &str, user_id: UserId) -> Result<()> {
        self.cache.put(external_id, user_id, self.ttl).await?;
        tracing::debug!(user_id = %user_id, "Identity mapping cached");
        Ok(())
    }

    /// Drop both directions from the cache.
    ///
    /// # Errors
    ///
    /// Returns error if the cache fails.
    pub async fn remove_mapping(&self, external_id: &str, user_id: UserId) -> Result<()> {
        self.cache.remove(external_id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockCredentialRepository, MockIdentityCache};

    #[tokio::test]
    async fn test_miss_falls_through_and_populates_both_directions() {
        let repo = MockCredentialRepository::new();
        let alice = repo
            .add_password_user("alice", "alice@example.com", "pw")
            .unwrap_or_else(|e| panic!("{e}"));
        repo.link_external_id(TenantScope::CrossTenant, alice.user_id, "fb-alice")
            .await
            .unwrap_or(());

        let cache = MockIdentityCache::new();
        let mapper = IdentityMapper::new(cache.clone(), repo, Duration::from_secs(60));

        assert_eq!(mapper.internal_id("fb-alice").await, Ok(Some(alice.user_id)));
        assert_eq!(
            cache.external_id(alice.user_id).await,
            Ok(Some("fb-alice".to_string())),
            "reverse direction populated by the forward miss"
        );
        assert_eq!(
            mapper.external_id(alice.user_id).await,
            Ok(Some("fb-alice".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_subject() {
        let mapper = IdentityMapper::new(
            MockIdentityCache::new(),
            MockCredentialRepository::new(),
            Duration::from_secs(60),
        );
        assert_eq!(mapper.internal_id("nobody").await, Ok(None));
        assert_eq!(mapper.external_id(UserId(99)).await, Ok(None));
    }

    #[tokio::test]
    async fn test_create_and_remove_mapping() {
        let cache = MockIdentityCache::new();
        let mapper = IdentityMapper::new(
            cache.clone(),
            MockCredentialRepository::new(),
            Duration::from_secs(60),
        );

        mapper.create_mapping("ext-1", UserId(3)).await.unwrap_or(());
        mapper.create_mapping("ext-1", UserId(3)).await.unwrap_or(());
        assert_eq!(mapper.internal_id("ext-1").await, Ok(Some(UserId(3))));

        mapper.remove_mapping("ext-1", UserId(3)).await.unwrap_or(());
        assert_eq!(mapper.internal_id("ext-1").await, Ok(None));
    }
}
