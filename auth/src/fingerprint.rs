//! Access token binding to the client context.
//!
//! The fingerprint is `sha256_hex(user_agent + "|" + client_ip)`, with
//! `unknown` standing in for a missing value. A mismatch is recorded as a
//! critical audit event but the request is **not** rejected: users move
//! between networks and browsers update, so the binding only detects.

use crate::audit::{SecurityAuditTrail, SecurityEvent};
use crate::constants::UNKNOWN;
use crate::context::RequestContext;
use crate::error::Result;
use crate::providers::{AuditSink, FingerprintStore};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::time::Duration;

/// Outcome of comparing a live fingerprint with the bound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintCheck {
    /// Same client context as at issuance.
    Match,
    /// Different client context. Audited, not enforced.
    Mismatch,
    /// No binding (expired, removed or never bound).
    Unbound,
}

/// Derives, binds and checks client fingerprints.
#[derive(Debug, Clone)]
pub struct FingerprintBinder<F: FingerprintStore, S: AuditSink> {
    store: F,
    audit: SecurityAuditTrail<S>,
    ttl: Duration,
}

impl<F: FingerprintStore, S: AuditSink> FingerprintBinder<F, S> {
    /// Create a binder whose bindings live for `ttl`.
    #[must_use]
    pub const fn new(store: F, audit: SecurityAuditTrail<S>, ttl: Duration) -> Self {
        Self { store, audit, ttl }
    }

    /// Fingerprint of a client context.
    #[must_use]
    pub fn fingerprint(user_agent: Option<&str>, client_ip: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_agent.unwrap_or(UNKNOWN).as_bytes());
        hasher.update(b"|");
        hasher.update(client_ip.unwrap_or(UNKNOWN).as_bytes());

        hasher
            .finalize()
            .iter()
            .fold(String::with_capacity(64), |mut hex, byte| {
                let _ = write!(hex, "{byte:02x}");
                hex
            })
    }

    /// Fingerprint of the request's client.
    #[must_use]
    pub fn for_context(ctx: &RequestContext) -> String {
        Self::fingerprint(ctx.user_agent.as_deref(), ctx.client_ip.as_deref())
    }

    /// Bind the request's fingerprint to `access_token`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn bind(&self, access_token: &str, ctx: &RequestContext) -> Result<()> {
        self.store
            .bind(access_token, &Self::for_context(ctx), self.ttl)
            .await
    }

    /// Compare the request's fingerprint with the one bound to `access_token`.
    ///
    /// A mismatch is durably audited before this returns.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn check(&self, access_token: &str, ctx: &RequestContext) -> Result<FingerprintCheck> {
        let Some(bound) = self.store.get(access_token).await? else {
            return Ok(FingerprintCheck::Unbound);
        };

        let live = Self::for_context(ctx);
        if constant_time_eq::constant_time_eq(bound.as_bytes(), live.as_bytes()) {
            return Ok(FingerprintCheck::Match);
        }

        let actor = ctx.principal.map(|p| p.user_id);
        tracing::warn!(
            user_id = ?actor,
            client_ip = ctx.ip_or_unknown(),
            "Access token presented from a different client context"
        );
        self.audit
            .record(
                SecurityEvent::TokenFingerprintMismatch,
                actor,
                ctx.client_ip.as_deref(),
                format!(
                    "user_agent={}",
                    ctx.user_agent.as_deref().unwrap_or(UNKNOWN)
                ),
            )
            .await;
        Ok(FingerprintCheck::Mismatch)
    }

    /// Remove the binding of `access_token`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn unbind(&self, access_token: &str) -> Result<()> {
        self.store.remove(access_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::mocks::{MockAuditSink, MockFingerprintStore};

    type Binder = FingerprintBinder<MockFingerprintStore, MockAuditSink>;

    fn binder(sink: &MockAuditSink) -> Binder {
        let trail = SecurityAuditTrail::new(sink.clone(), &AuditConfig::default());
        FingerprintBinder::new(MockFingerprintStore::new(), trail, Duration::from_secs(60))
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = Binder::fingerprint(Some("Mozilla/5.0"), Some("10.0.0.1"));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, Binder::fingerprint(Some("Mozilla/5.0"), Some("10.0.0.1")));
        assert_ne!(fp, Binder::fingerprint(Some("Mozilla/5.0"), Some("10.0.0.2")));
    }

    #[test]
    fn test_missing_values_hash_as_unknown() {
        assert_eq!(
            Binder::fingerprint(None, None),
            Binder::fingerprint(Some("unknown"), Some("unknown"))
        );
        assert_eq!(
            Binder::fingerprint(None, None),
            "865a9e4873caf3a5eaf4a3a7a6cd0fba2be58e424135ad046de35ec6d3c30265"
        );
    }

    #[tokio::test]
    async fn test_mismatch_is_audited_but_not_rejected() {
        let sink = MockAuditSink::new();
        let binder = binder(&sink);
        let issued = RequestContext::new("10.0.0.1", "Mozilla/5.0");
        binder.bind("at-1", &issued).await.unwrap_or(());

        assert_eq!(binder.check("at-1", &issued).await, Ok(FingerprintCheck::Match));
        assert!(sink.entries_for("TOKEN_FINGERPRINT_MISMATCH").is_empty());

        let copied = RequestContext::new("203.0.113.9", "curl/8.0");
        assert_eq!(binder.check("at-1", &copied).await, Ok(FingerprintCheck::Mismatch));
        assert_eq!(sink.entries_for("TOKEN_FINGERPRINT_MISMATCH").len(), 1);
    }

    #[tokio::test]
    async fn test_unbind() {
        let sink = MockAuditSink::new();
        let binder = binder(&sink);
        let ctx = RequestContext::new("10.0.0.1", "ua");
        binder.bind("at-1", &ctx).await.unwrap_or(());
        binder.unbind("at-1").await.unwrap_or(());

        assert_eq!(binder.check("at-1", &ctx).await, Ok(FingerprintCheck::Unbound));
    }
}
