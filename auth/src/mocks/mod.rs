//! Mock provider implementations for testing.
//!
//! This module provides simple, in-memory implementations of all provider
//! traits for use in unit and integration tests. Each store keeps its
//! state behind a single `Mutex`, so every trait operation is one
//! critical section and has the same atomicity as the production store.

use crate::error::{AuthError, Result};
use std::sync::{Mutex, MutexGuard};

pub mod audit;
pub mod challenge_store;
pub mod credential;
pub mod fingerprint;
pub mod identity;
pub mod identity_provider;
pub mod rate_limiter;
pub mod refresh_token;
pub mod session;

pub use audit::MockAuditSink;
pub use challenge_store::MockChallengeStore;
pub use credential::MockCredentialRepository;
pub use fingerprint::MockFingerprintStore;
pub use identity::MockIdentityCache;
pub use identity_provider::MockIdentityProvider;
pub use rate_limiter::MockAttemptCounter;
pub use refresh_token::MockRefreshTokenStore;
pub use session::MockAccessSessionStore;

pub(crate) use crate::utils::expires_after as expiry;

/// Lock a mock's state, mapping poisoning to an internal error.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))
}
