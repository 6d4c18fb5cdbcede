//! Security environment.
//!
//! Bundles every provider the security core depends on so the
//! application wires them once and hands them to
//! [`SessionEstablisher::new`](crate::session::SessionEstablisher::new).

use crate::providers::{
    AccessSessionStore, AttemptCounter, AuditSink, CredentialRepository, FingerprintStore,
    IdentityMappingCache, IdentityProvider, MfaChallengeStore, RefreshTokenStore,
};

/// Providers used by the security core.
///
/// # Type Parameters
///
/// - `R`: Credential repository (`PostgreSQL` user/tenant tables)
/// - `P`: Federated identity provider (JWKS verification)
/// - `M`: Identity mapping cache (`Redis`)
/// - `T`: Refresh token store (`Redis` - atomic rotation)
/// - `C`: MFA challenge store (`Redis` - atomic consumption)
/// - `F`: Fingerprint store (`Redis`)
/// - `A`: Access session store (`Redis`)
/// - `L`: Attempt counter (`Redis` - rate limiting)
/// - `S`: Audit sink
#[derive(Debug, Clone)]
pub struct SecurityEnvironment<R, P, M, T, C, F, A, L, S>
where
    R: CredentialRepository + Clone,
    P: IdentityProvider + Clone,
    M: IdentityMappingCache + Clone,
    T: RefreshTokenStore + Clone,
    C: MfaChallengeStore + Clone,
    F: FingerprintStore + Clone,
    A: AccessSessionStore + Clone,
    L: AttemptCounter + Clone,
    S: AuditSink,
{
    /// Credential repository.
    pub credentials: R,

    /// Federated identity provider.
    pub identity_provider: P,

    /// Identity mapping cache.
    pub identity_cache: M,

    /// Refresh token store.
    pub refresh_tokens: T,

    /// MFA challenge store.
    pub challenges: C,

    /// Fingerprint store.
    pub fingerprints: F,

    /// Access session store.
    pub sessions: A,

    /// Rate limit attempt counter.
    pub attempts: L,

    /// Audit sink.
    pub audit_sink: S,
}

impl<R, P, M, T, C, F, A, L, S> SecurityEnvironment<R, P, M, T, C, F, A, L, S>
where
    R: CredentialRepository + Clone,
    P: IdentityProvider + Clone,
    M: IdentityMappingCache + Clone,
    T: RefreshTokenStore + Clone,
    C: MfaChallengeStore + Clone,
    F: FingerprintStore + Clone,
    A: AccessSessionStore + Clone,
    L: AttemptCounter + Clone,
    S: AuditSink,
{
    /// Create a new security environment.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        credentials: R,
        identity_provider: P,
        identity_cache: M,
        refresh_tokens: T,
        challenges: C,
        fingerprints: F,
        sessions: A,
        attempts: L,
        audit_sink: S,
    ) -> Self {
        Self {
            credentials,
            identity_provider,
            identity_cache,
            refresh_tokens,
            challenges,
            fingerprints,
            sessions,
            attempts,
            audit_sink,
        }
    }
}

/// Environment made entirely of in-memory mocks.
#[cfg(any(test, feature = "test-utils"))]
pub type MockEnvironment = SecurityEnvironment<
    crate::mocks::MockCredentialRepository,
    crate::mocks::MockIdentityProvider,
    crate::mocks::MockIdentityCache,
    crate::mocks::MockRefreshTokenStore,
    crate::mocks::MockChallengeStore,
    crate::mocks::MockFingerprintStore,
    crate::mocks::MockAccessSessionStore,
    crate::mocks::MockAttemptCounter,
    crate::mocks::MockAuditSink,
>;

#[cfg(any(test, feature = "test-utils"))]
impl MockEnvironment {
    /// Fresh, empty mocks.
    #[must_use]
    pub fn mock() -> Self {
        Self::new(
            crate::mocks::MockCredentialRepository::new(),
            crate::mocks::MockIdentityProvider::new(),
            crate::mocks::MockIdentityCache::new(),
            crate::mocks::MockRefreshTokenStore::new(),
            crate::mocks::MockChallengeStore::new(),
            crate::mocks::MockFingerprintStore::new(),
            crate::mocks::MockAccessSessionStore::new(),
            crate::mocks::MockAttemptCounter::new(),
            crate::mocks::MockAuditSink::new(),
        )
    }
}
