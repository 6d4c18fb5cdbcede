//! Mock credential repository for testing.

use super::lock;
use crate::context::TenantScope;
use crate::error::{AuthError, Result};
use crate::providers::CredentialRepository;
use crate::state::{AccountStatus, Credential, NewFederatedAccount, TenantId, UserId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct State {
    users: BTreeMap<UserId, Credential>,
    tenant_names: BTreeMap<TenantId, String>,
    next_user: i64,
    next_tenant: i64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            tenant_names: BTreeMap::new(),
            next_user: 1,
            next_tenant: 1,
        }
    }
}

impl State {
    fn find(&self, scope: TenantScope, pred: impl Fn(&Credential) -> bool) -> Option<Credential> {
        self.users
            .values()
            .find(|c| scope.allows(c.tenant_id) && pred(c))
            .cloned()
    }

    fn allocate(&mut self, organization_name: &str) -> (UserId, TenantId) {
        let user_id = UserId(self.next_user);
        let tenant_id = TenantId(self.next_tenant);
        self.next_user += 1;
        self.next_tenant += 1;
        self.tenant_names.insert(tenant_id, organization_name.to_string());
        (user_id, tenant_id)
    }
}

/// In-memory credential repository that honours [`TenantScope`].
///
/// Lookups can be switched off with `set_unavailable` to simulate a
/// database outage.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone, Default)]
pub struct MockCredentialRepository {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

impl MockCredentialRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every lookup fail with a database error (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::DatabaseError("credential store unavailable".into()));
        }
        Ok(())
    }

    /// Add a password account in its own tenant.
    ///
    /// Hashes with the minimum bcrypt cost to keep tests fast.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    pub fn add_password_user(&self, username: &str, email: &str, password: &str) -> Result<Credential> {
        let hash = bcrypt::hash(password, 4)
            .map_err(|e| AuthError::InternalError(format!("bcrypt failed: {e}")))?;

        let mut state = lock(&self.state)?;
        let (user_id, tenant_id) = state.allocate(email);
        let credential = Credential {
            user_id,
            tenant_id,
            username: username.to_string(),
            email: Some(email.to_string()),
            name: Some(username.to_string()),
            password_hash: Some(hash),
            status: AccountStatus::Enabled,
            external_id: None,
            mfa_secret: None,
            mfa_enabled: false,
            roles: vec![crate::constants::DEFAULT_ROLE.to_string()],
            last_login_at: None,
        };
        state.users.insert(user_id, credential.clone());
        Ok(credential)
    }

    /// Enable or disable an account.
    pub fn set_status(&self, user_id: UserId, status: AccountStatus) {
        if let Ok(mut state) = lock(&self.state) {
            if let Some(user) = state.users.get_mut(&user_id) {
                user.status = status;
            }
        }
    }

    /// Current record for a user, regardless of tenant.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<Credential> {
        lock(&self.state).ok()?.users.get(&user_id).cloned()
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).map(|s| s.users.len()).unwrap_or(0)
    }

    /// Returns `true` if there are no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the tenant container created for an account.
    #[must_use]
    pub fn tenant_name(&self, tenant_id: TenantId) -> Option<String> {
        lock(&self.state).ok()?.tenant_names.get(&tenant_id).cloned()
    }
}

impl CredentialRepository for MockCredentialRepository {
    async fn find_by_username(&self, scope: TenantScope, username: &str) -> Result<Option<Credential>> {
        self.check_available()?;
        Ok(lock(&self.state)?.find(scope, |c| c.username == username))
    }

    async fn find_by_id(&self, scope: TenantScope, user_id: UserId) -> Result<Option<Credential>> {
        self.check_available()?;
        Ok(lock(&self.state)?.find(scope, |c| c.user_id == user_id))
    }

    async fn find_by_email(&self, scope: TenantScope, email: &str) -> Result<Option<Credential>> {
        self.check_available()?;
        Ok(lock(&self.state)?.find(scope, |c| {
            c.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email))
        }))
    }

    async fn find_by_external_id(
        &self,
        scope: TenantScope,
        external_id: &str,
    ) -> Result<Option<Credential>> {
        self.check_available()?;
        Ok(lock(&self.state)?.find(scope, |c| c.external_id.as_deref() == Some(external_id)))
    }

    async fn create_federated(&self, account: NewFederatedAccount) -> Result<Credential> {
        let mut state = lock(&self.state)?;

        let taken = state.users.values().any(|c| {
            c.external_id.as_deref() == Some(account.external_id.as_str())
                || c.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(&account.email))
        });
        if taken {
            return Err(AuthError::AccountLinkConflict);
        }

        let (user_id, tenant_id) = state.allocate(&account.organization_name);
        let credential = Credential {
            user_id,
            tenant_id,
            username: account.email.clone(),
            email: Some(account.email),
            name: account.name,
            password_hash: None,
            status: AccountStatus::Enabled,
            external_id: Some(account.external_id),
            mfa_secret: None,
            mfa_enabled: false,
            roles: vec![account.role],
            last_login_at: None,
        };
        state.users.insert(user_id, credential.clone());
        Ok(credential)
    }

    async fn link_external_id(&self, scope: TenantScope, user_id: UserId, external_id: &str) -> Result<()> {
        let mut state = lock(&self.state)?;

        let owned_elsewhere = state
            .users
            .values()
            .any(|c| c.user_id != user_id && c.external_id.as_deref() == Some(external_id));
        if owned_elsewhere {
            return Err(AuthError::AccountLinkConflict);
        }

        let user = state
            .users
            .get_mut(&user_id)
            .filter(|c| scope.allows(c.tenant_id))
            .ok_or_else(|| AuthError::DatabaseError(format!("user {user_id} not found")))?;

        match user.external_id.as_deref() {
            Some(existing) if existing == external_id => Ok(()),
            Some(_) => Err(AuthError::AccountLinkConflict),
            None => {
                user.external_id = Some(external_id.to_string());
                Ok(())
            }
        }
    }

    async fn set_mfa(
        &self,
        scope: TenantScope,
        user_id: UserId,
        encrypted_secret: Option<String>,
        enabled: bool,
    ) -> Result<()> {
        let mut state = lock(&self.state)?;
        let user = state
            .users
            .get_mut(&user_id)
            .filter(|c| scope.allows(c.tenant_id))
            .ok_or_else(|| AuthError::DatabaseError(format!("user {user_id} not found")))?;
        user.mfa_secret = encrypted_secret;
        user.mfa_enabled = enabled;
        Ok(())
    }

    async fn record_login(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        if let Some(user) = lock(&self.state)?.users.get_mut(&user_id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tenant_scope_is_enforced() {
        let repo = MockCredentialRepository::new();
        let alice = repo
            .add_password_user("alice", "alice@example.com", "pw")
            .unwrap_or_else(|e| panic!("{e}"));

        let other_tenant = TenantScope::Tenant(TenantId(alice.tenant_id.0 + 100));
        assert_eq!(repo.find_by_username(other_tenant, "alice").await.ok(), Some(None));
        assert!(
            repo.find_by_username(TenantScope::CrossTenant, "alice")
                .await
                .ok()
                .flatten()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_link_conflicts() {
        let repo = MockCredentialRepository::new();
        let alice = repo
            .add_password_user("alice", "alice@example.com", "pw")
            .unwrap_or_else(|e| panic!("{e}"));
        let scope = TenantScope::CrossTenant;

        assert!(repo.link_external_id(scope, alice.user_id, "uid-1").await.is_ok());
        assert!(repo.link_external_id(scope, alice.user_id, "uid-1").await.is_ok(), "idempotent");
        assert_eq!(
            repo.link_external_id(scope, alice.user_id, "uid-2").await,
            Err(AuthError::AccountLinkConflict)
        );
    }
}
