//! Password and federated credential verification.
//!
//! # Enumeration resistance
//!
//! An unknown username and a wrong password produce the same
//! [`AuthError::InvalidCredentials`], and both run one bcrypt
//! verification so response times match. The account status is only
//! checked **after** the password, so a disabled account cannot be
//! probed without its password either.
//!
//! # Trust policy
//!
//! Federated sign-ins through a social provider (`google.com`,
//! `apple.com`, …) or enterprise SSO (`saml.*`, `oidc.*`) rely on the
//! provider's own verification. Every other method (`password`,
//! `emailLink`, `custom`, …) must carry `email_verified = true`.

use crate::constants::{DEFAULT_ROLE, TRUSTED_SIGN_IN_PREFIXES, TRUSTED_SIGN_IN_PROVIDERS};
use crate::context::TenantScope;
use crate::error::{AuthError, Result};
use crate::providers::{CredentialRepository, IdentityProvider};
use crate::state::{Credential, FederatedIdentity, NewFederatedAccount};
use crate::utils::{email_local_part, is_valid_email};
use std::sync::{Arc, OnceLock};

/// Password hashed once to give unknown usernames a real hash to verify against.
const TIMING_EQUALIZER: &str = "chronoflow-timing-equalizer";

/// Verifies passwords and federated identity tokens.
#[derive(Debug, Clone)]
pub struct CredentialVerifier<R: CredentialRepository, P: IdentityProvider> {
    credentials: R,
    identity_provider: P,
    hash_cost: u32,
    dummy_hash: Arc<OnceLock<String>>,
}

impl<R: CredentialRepository, P: IdentityProvider> CredentialVerifier<R, P> {
    /// Create a verifier.
    #[must_use]
    pub fn new(credentials: R, identity_provider: P) -> Self {
        Self {
            credentials,
            identity_provider,
            hash_cost: bcrypt::DEFAULT_COST,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    /// Bcrypt cost of the hash used for unknown usernames.
    ///
    /// Should match the cost of stored password hashes.
    #[must_use]
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self.dummy_hash = Arc::new(OnceLock::new());
        self
    }

    /// Credential repository this verifier reads.
    #[must_use]
    pub const fn credentials(&self) -> &R {
        &self.credentials
    }

    /// Check a username/password pair.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`]: unknown user or wrong password
    /// - [`AuthError::AccountDisabled`]: correct password, disabled account
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Credential> {
        let credential = self
            .credentials
            .find_by_username(TenantScope::CrossTenant, username)
            .await?;

        let hash = match credential.as_ref().and_then(|c| c.password_hash.clone()) {
            Some(hash) => hash,
            None => self.dummy_hash().await?,
        };
        let matches = verify_password(password.to_string(), hash).await?;

        let credential = match credential {
            Some(c) if matches && c.password_hash.is_some() => c,
            _ => {
                tracing::warn!(username = username, "Password authentication failed");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !credential.is_enabled() {
            tracing::warn!(user_id = %credential.user_id, "Login attempt on disabled account");
            return Err(AuthError::AccountDisabled);
        }
        Ok(credential)
    }

    /// Verify a federated identity token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityProviderVerificationFailed`] for any
    /// invalid token.
    pub async fn verify_federated(&self, id_token: &str) -> Result<FederatedIdentity> {
        self.identity_provider.verify(id_token).await
    }

    /// Whether a sign-in method is trusted to have verified the email.
    #[must_use]
    pub fn is_trusted_provider(sign_in_provider: &str) -> bool {
        TRUSTED_SIGN_IN_PROVIDERS.contains(&sign_in_provider)
            || TRUSTED_SIGN_IN_PREFIXES
                .iter()
                .any(|prefix| sign_in_provider.starts_with(prefix))
    }

    /// Apply the email verification policy.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for an unverified email on
    /// an untrusted sign-in method.
    pub fn enforce_trust_policy(identity: &FederatedIdentity) -> Result<()> {
        if identity.email_verified || Self::is_trusted_provider(&identity.sign_in_provider) {
            Ok(())
        } else {
            tracing::warn!(
                external_id = %identity.external_id,
                sign_in_provider = %identity.sign_in_provider,
                "Federated login rejected: email not verified"
            );
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Create an account for an unknown federated identity from a trusted
    /// sign-in method.
    ///
    /// The tenant container is named after the email local part and the
    /// account gets the default role.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`]: untrusted method or no usable email
    /// - [`AuthError::AccountLinkConflict`]: email owned by another account
    pub async fn auto_register(&self, identity: &FederatedIdentity) -> Result<Credential> {
        if !Self::is_trusted_provider(&identity.sign_in_provider) {
            return Err(AuthError::InvalidCredentials);
        }
        self.register(identity, None, None).await
    }

    /// Create an account for a federated identity.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`]: no usable email
    /// - [`AuthError::AccountLinkConflict`]: identity or email already taken
    pub async fn register(
        &self,
        identity: &FederatedIdentity,
        name: Option<String>,
        organization_name: Option<String>,
    ) -> Result<Credential> {
        let email = identity
            .email
            .as_deref()
            .filter(|e| is_valid_email(e))
            .ok_or(AuthError::InvalidCredentials)?;

        let organization_name = organization_name
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| email_local_part(email).to_string());

        let credential = self
            .credentials
            .create_federated(NewFederatedAccount {
                external_id: identity.external_id.clone(),
                email: email.to_string(),
                name: name.or_else(|| identity.name.clone()),
                organization_name,
                role: DEFAULT_ROLE.to_string(),
            })
            .await?;

        tracing::info!(
            user_id = %credential.user_id,
            tenant_id = %credential.tenant_id,
            sign_in_provider = %identity.sign_in_provider,
            "Federated account registered"
        );
        Ok(credential)
    }

    async fn dummy_hash(&self) -> Result<String> {
        if let Some(hash) = self.dummy_hash.get() {
            return Ok(hash.clone());
        }
        let cost = self.hash_cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(TIMING_EQUALIZER, cost))
            .await
            .map_err(|e| AuthError::InternalError(format!("hash task failed: {e}")))?
            .map_err(|e| AuthError::InternalError(format!("bcrypt hash failed: {e}")))?;
        Ok(self.dummy_hash.get_or_init(|| hash).clone())
    }
}

/// Bcrypt verification off the async executor.
async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| AuthError::InternalError(format!("password task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockCredentialRepository, MockIdentityProvider};
    use crate::state::AccountStatus;

    type Verifier = CredentialVerifier<MockCredentialRepository, MockIdentityProvider>;

    fn verifier(repo: &MockCredentialRepository) -> Verifier {
        CredentialVerifier::new(repo.clone(), MockIdentityProvider::new()).with_hash_cost(4)
    }

    fn identity(provider: &str, verified: bool) -> FederatedIdentity {
        FederatedIdentity {
            external_id: "uid-1".into(),
            email: Some("carol@acme.io".into()),
            email_verified: verified,
            sign_in_provider: provider.into(),
            name: Some("Carol".into()),
        }
    }

    #[tokio::test]
    async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
        let repo = MockCredentialRepository::new();
        repo.add_password_user("alice", "alice@example.com", "correct horse")
            .unwrap_or_else(|e| panic!("{e}"));
        let verifier = verifier(&repo);

        assert_eq!(
            verifier.authenticate("alice", "wrong").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            verifier.authenticate("mallory", "wrong").await,
            Err(AuthError::InvalidCredentials)
        );
        assert!(verifier.authenticate("alice", "correct horse").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_account_checked_after_password() {
        let repo = MockCredentialRepository::new();
        let alice = repo
            .add_password_user("alice", "alice@example.com", "pw")
            .unwrap_or_else(|e| panic!("{e}"));
        repo.set_status(alice.user_id, AccountStatus::Disabled);
        let verifier = verifier(&repo);

        assert_eq!(
            verifier.authenticate("alice", "nope").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            verifier.authenticate("alice", "pw").await,
            Err(AuthError::AccountDisabled)
        );
    }

    #[test]
    fn test_trusted_providers() {
        for provider in ["google.com", "apple.com", "github.com", "saml.acme", "oidc.okta"] {
            assert!(Verifier::is_trusted_provider(provider), "{provider}");
        }
        for provider in ["password", "emailLink", "custom", "phone", "saml"] {
            assert!(!Verifier::is_trusted_provider(provider), "{provider}");
        }
    }

    #[test]
    fn test_trust_policy() {
        assert!(Verifier::enforce_trust_policy(&identity("google.com", false)).is_ok());
        assert!(Verifier::enforce_trust_policy(&identity("password", true)).is_ok());
        assert_eq!(
            Verifier::enforce_trust_policy(&identity("password", false)),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_auto_register_names_tenant_after_email() {
        let repo = MockCredentialRepository::new();
        let verifier = verifier(&repo);

        let created = verifier
            .auto_register(&identity("google.com", true))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(created.roles, vec![DEFAULT_ROLE.to_string()]);
        assert_eq!(created.external_id.as_deref(), Some("uid-1"));
        assert_eq!(repo.tenant_name(created.tenant_id).as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_auto_register_refuses_untrusted_method() {
        let repo = MockCredentialRepository::new();
        let verifier = verifier(&repo);
        assert_eq!(
            verifier.auto_register(&identity("password", true)).await,
            Err(AuthError::InvalidCredentials)
        );
        assert!(repo.is_empty());
    }
}
