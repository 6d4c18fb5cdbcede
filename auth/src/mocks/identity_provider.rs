//! Mock federated identity provider for testing.

use super::lock;
use crate::error::{AuthError, Result};
use crate::providers::IdentityProvider;
use crate::state::FederatedIdentity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Identity provider that accepts a fixed set of tokens.
///
/// Unknown tokens fail exactly like a bad signature would.
#[derive(Debug, Clone, Default)]
pub struct MockIdentityProvider {
    tokens: Arc<Mutex<HashMap<String, FederatedIdentity>>>,
    delay: Option<Duration>,
}

impl MockIdentityProvider {
    /// Create a provider that accepts nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a slow provider.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Accept `token` as asserting `identity`.
    pub fn issue(&self, token: &str, identity: FederatedIdentity) {
        if let Ok(mut tokens) = lock(&self.tokens) {
            tokens.insert(token.to_string(), identity);
        }
    }
}

impl IdentityProvider for MockIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.tokens)?
            .get(id_token)
            .cloned()
            .ok_or(AuthError::IdentityProviderVerificationFailed)
    }
}
