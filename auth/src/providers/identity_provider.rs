//! Federated identity provider trait.

use crate::error::Result;
use crate::state::FederatedIdentity;

/// Verifies identity tokens issued by an external provider.
///
/// Implementations check signature, expiry, issuer and audience, and
/// report **every** failure as
/// [`AuthError::IdentityProviderVerificationFailed`](crate::AuthError::IdentityProviderVerificationFailed).
/// The specific reason is logged, never returned.
pub trait IdentityProvider: Send + Sync {
    /// Verify `id_token` and extract its claims.
    ///
    /// # Errors
    ///
    /// Returns `IdentityProviderVerificationFailed` for any invalid token.
    fn verify(
        &self,
        id_token: &str,
    ) -> impl std::future::Future<Output = Result<FederatedIdentity>> + Send;
}
