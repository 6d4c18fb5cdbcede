//! Credential repository trait.
//!
//! This is the boundary to the user/tenant tables owned by the rest of
//! the application. Every lookup takes an explicit [`TenantScope`]:
//! pre-authentication flows pass [`TenantScope::CrossTenant`], flows on
//! behalf of a signed-in user pass the principal's tenant.

use crate::context::TenantScope;
use crate::error::Result;
use crate::state::{Credential, NewFederatedAccount, UserId};
use chrono::{DateTime, Utc};

/// Credential storage.
pub trait CredentialRepository: Send + Sync {
    /// Find by login name.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_by_username(
        &self,
        scope: TenantScope,
        username: &str,
    ) -> impl std::future::Future<Output = Result<Option<Credential>>> + Send;

    /// Find by internal id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_by_id(
        &self,
        scope: TenantScope,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<Option<Credential>>> + Send;

    /// Find by email (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_by_email(
        &self,
        scope: TenantScope,
        email: &str,
    ) -> impl std::future::Future<Output = Result<Option<Credential>>> + Send;

    /// Find by linked federated id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_by_external_id(
        &self,
        scope: TenantScope,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Credential>>> + Send;

    /// Create a user, its tenant container and default role in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AccountLinkConflict`](crate::AuthError::AccountLinkConflict)
    /// if the email or external id is already taken, or a storage error.
    fn create_federated(
        &self,
        account: NewFederatedAccount,
    ) -> impl std::future::Future<Output = Result<Credential>> + Send;

    /// Link an external id to an existing account.
    ///
    /// Linking the same id twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AccountLinkConflict` if the account is linked to a
    /// different external id, or the external id to a different account.
    fn link_external_id(
        &self,
        scope: TenantScope,
        user_id: UserId,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Store (or clear) the encrypted TOTP secret and the enabled flag.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    fn set_mfa(
        &self,
        scope: TenantScope,
        user_id: UserId,
        encrypted_secret: Option<String>,
        enabled: bool,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Record a successful login.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    fn record_login(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
