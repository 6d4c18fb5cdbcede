//! Identity provider backed by a remote JWKS endpoint.
//!
//! Verifies RS256/ES256 identity tokens (Firebase, Google Sign-In) against
//! the provider's published signing keys. The key set is cached for
//! [`FederatedConfig::jwks_cache_ttl`] and refetched when a token names a
//! `kid` the cached set does not contain (key rotation). Refetches are
//! single-flight and at most one per [`MIN_REFETCH_INTERVAL`], so tokens
//! carrying random `kid`s cannot turn into a flood of outbound requests.
//!
//! # Security
//!
//! - Algorithm comes from the JWK, never from the token header
//! - `iss`, `aud` and `exp` are always validated
//! - Redirects are not followed and responses are capped in size
//! - Every failure surfaces as
//!   [`AuthError::IdentityProviderVerificationFailed`]; the reason is logged

use crate::config::FederatedConfig;
use crate::error::{AuthError, Result};
use crate::providers::IdentityProvider;
use crate::state::FederatedIdentity;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Upper bound on a JWKS response body.
const MAX_JWKS_BYTES: usize = 512 * 1024;

/// Timeout for the key set fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum spacing between two fetches of the key set.
pub const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

impl JwkSet {
    fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

#[derive(Debug, Deserialize)]
struct FirebaseClaim {
    sign_in_provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    firebase: Option<FirebaseClaim>,
}

impl IdTokenClaims {
    fn into_identity(self, fallback_provider: &str) -> FederatedIdentity {
        let sign_in_provider = self
            .firebase
            .and_then(|f| f.sign_in_provider)
            .unwrap_or_else(|| fallback_provider.to_string());

        FederatedIdentity {
            external_id: self.sub,
            email: self.email,
            email_verified: self.email_verified,
            sign_in_provider,
            name: self.name,
        }
    }
}

/// JWKS-backed [`IdentityProvider`].
#[derive(Debug, Clone)]
pub struct JwksIdentityProvider {
    config: FederatedConfig,
    http: reqwest::Client,
    cache: Arc<RwLock<Option<(Instant, JwkSet)>>>,
    last_fetch: Arc<Mutex<Option<Instant>>>,
}

impl JwksIdentityProvider {
    /// Create a provider for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] if the JWKS URI is not HTTPS or
    /// the HTTP client cannot be built.
    pub fn new(config: FederatedConfig) -> Result<Self> {
        if !config.jwks_uri.starts_with("https://") {
            return Err(AuthError::ConfigError(format!(
                "JWKS URI must use https: {}",
                config.jwks_uri
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::ConfigError(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            cache: Arc::new(RwLock::new(None)),
            last_fetch: Arc::new(Mutex::new(None)),
        })
    }

    async fn cached_set(&self) -> Option<JwkSet> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.config.jwks_cache_ttl)
            .map(|(_, set)| set.clone())
    }

    async fn refresh_set(&self) -> std::result::Result<JwkSet, String> {
        let response = self
            .http
            .get(&self.config.jwks_uri)
            .send()
            .await
            .map_err(|e| format!("JWKS request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("JWKS endpoint returned HTTP {}", response.status()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("JWKS body unreadable: {e}"))?;
        if bytes.len() > MAX_JWKS_BYTES {
            return Err(format!("JWKS response too large: {} bytes", bytes.len()));
        }

        let set: JwkSet =
            serde_json::from_slice(&bytes).map_err(|e| format!("JWKS unparsable: {e}"))?;

        *self.cache.write().await = Some((Instant::now(), set.clone()));
        tracing::debug!(keys = set.keys.len(), uri = %self.config.jwks_uri, "JWKS refreshed");
        Ok(set)
    }

    async fn cached_key(&self, kid: &str) -> Option<Jwk> {
        self.cached_set().await.and_then(|set| set.find(kid).cloned())
    }

    async fn key_for(&self, kid: &str) -> std::result::Result<Jwk, String> {
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        // Unknown kid: the provider may have rotated keys since the last fetch.
        // Concurrent misses queue here and see the winner's result.
        let mut last_fetch = self.last_fetch.lock().await;
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }
        let cooldown = MIN_REFETCH_INTERVAL.min(self.config.jwks_cache_ttl);
        if last_fetch.is_some_and(|at| at.elapsed() < cooldown) {
            metrics::counter!("auth_jwks_refetch_throttled_total").increment(1);
            return Err(format!("no signing key with kid {kid} (refetch throttled)"));
        }
        *last_fetch = Some(Instant::now());

        self.refresh_set()
            .await?
            .find(kid)
            .cloned()
            .ok_or_else(|| format!("no signing key with kid {kid}"))
    }

    async fn verify_inner(&self, id_token: &str) -> std::result::Result<FederatedIdentity, String> {
        let header = decode_header(id_token).map_err(|e| format!("malformed header: {e}"))?;
        let kid = header.kid.ok_or("token header has no kid")?;

        let jwk = self.key_for(&kid).await?;
        let (key, algorithm) = decoding_key(&jwk)?;

        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);
        validation.leeway = self.config.leeway.as_secs();

        let data = decode::<IdTokenClaims>(id_token, &key, &validation)
            .map_err(|e| format!("token rejected: {e}"))?;

        Ok(data
            .claims
            .into_identity(&self.config.fallback_sign_in_provider))
    }
}

/// Decoding key and algorithm for a JWK.
fn decoding_key(jwk: &Jwk) -> std::result::Result<(DecodingKey, Algorithm), String> {
    match jwk.kty.as_str() {
        "RSA" => {
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                return Err("RSA key missing n or e".to_string());
            };
            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| format!("invalid RSA key: {e}"))?;
            let algorithm = match jwk.alg.as_deref() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            Ok((key, algorithm))
        }
        "EC" => {
            let (Some(x), Some(y)) = (jwk.x.as_deref(), jwk.y.as_deref()) else {
                return Err("EC key missing x or y".to_string());
            };
            let key = DecodingKey::from_ec_components(x, y)
                .map_err(|e| format!("invalid EC key: {e}"))?;
            let algorithm = match jwk.alg.as_deref() {
                Some("ES384") => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok((key, algorithm))
        }
        other => Err(format!("unsupported key type {other}")),
    }
}

impl IdentityProvider for JwksIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity> {
        self.verify_inner(id_token).await.map_err(|reason| {
            tracing::warn!(%reason, issuer = %self.config.issuer, "Identity token verification failed");
            AuthError::IdentityProviderVerificationFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_plain_http_jwks_uri() {
        let mut config = FederatedConfig::firebase("chronoflow-test");
        config.jwks_uri = "http://keys.example.com/jwks".to_string();
        assert!(matches!(
            JwksIdentityProvider::new(config),
            Err(AuthError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_token_fails_verification_without_fetch() {
        let provider = JwksIdentityProvider::new(FederatedConfig::firebase("chronoflow-test"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            provider.verify("not-a-jwt").await,
            Err(AuthError::IdentityProviderVerificationFailed)
        );
    }

    fn key(kid: &str) -> Jwk {
        Jwk {
            kid: Some(kid.into()),
            kty: "RSA".into(),
            alg: Some("RS256".into()),
            n: Some("sXch".into()),
            e: Some("AQAB".into()),
            x: None,
            y: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_kid_refetch_is_throttled() {
        let provider = JwksIdentityProvider::new(FederatedConfig::firebase("chronoflow-test"))
            .unwrap_or_else(|e| panic!("{e}"));
        *provider.cache.write().await = Some((
            Instant::now(),
            JwkSet {
                keys: vec![key("k1")],
            },
        ));
        *provider.last_fetch.lock().await = Some(Instant::now());

        let known = provider.key_for("k1").await;
        assert_eq!(known.ok().and_then(|k| k.kid).as_deref(), Some("k1"));

        for kid in ["random-1", "random-2", "random-3"] {
            let err = provider
                .key_for(kid)
                .await
                .err()
                .unwrap_or_else(|| panic!("unexpected key for {kid}"));
            assert!(err.contains("throttled"), "{err}");
        }
        assert!(provider.last_fetch.lock().await.is_some());
    }

    #[test]
    fn test_claims_fall_back_to_configured_provider() {
        let claims: IdTokenClaims = serde_json::from_str(
            r#"{"sub":"uid-1","email":"a@example.com","email_verified":true}"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let identity = claims.into_identity("google.com");
        assert_eq!(identity.external_id, "uid-1");
        assert_eq!(identity.sign_in_provider, "google.com");
        assert!(identity.email_verified);

        let claims: IdTokenClaims = serde_json::from_str(
            r#"{"sub":"uid-2","firebase":{"sign_in_provider":"password"}}"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let identity = claims.into_identity("google.com");
        assert_eq!(identity.sign_in_provider, "password");
        assert!(!identity.email_verified);
    }

    #[test]
    fn test_unsupported_key_type() {
        let jwk = Jwk {
            kid: Some("k1".into()),
            kty: "oct".into(),
            alg: None,
            n: None,
            e: None,
            x: None,
            y: None,
        };
        assert!(decoding_key(&jwk).is_err());
    }
}
