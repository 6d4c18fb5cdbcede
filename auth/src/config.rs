//! Security core configuration.
//!
//! Values are supplied by the application. Every struct has sensible
//! defaults and `with_*` builders; [`SecurityConfig::from_env`] reads the
//! recognized `CHRONOFLOW_SECURITY_*` variables on top of the defaults.

use crate::error::{AuthError, Result};
use std::time::Duration;

/// Fixed-window rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Attempts allowed per window.
    ///
    /// Default: 10
    pub max_attempts: u32,

    /// Window length, started by the first attempt.
    ///
    /// Default: 15 minutes
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit configuration.
    #[must_use]
    pub const fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(900))
    }
}

/// Token lifetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// Refresh token (and family) lifetime.
    ///
    /// Default: 7 days
    pub refresh_token_ttl: Duration,

    /// Access token lifetime.
    ///
    /// Default: 2 hours
    pub access_token_ttl: Duration,

    /// Fingerprint binding lifetime. Mirrors the access token.
    ///
    /// Default: 2 hours
    pub fingerprint_ttl: Duration,
}

impl TokenConfig {
    /// Set refresh token lifetime.
    #[must_use]
    pub const fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    /// Set access token lifetime.
    #[must_use]
    pub const fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    /// Set fingerprint binding lifetime.
    #[must_use]
    pub const fn with_fingerprint_ttl(mut self, ttl: Duration) -> Self {
        self.fingerprint_ttl = ttl;
        self
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_token_ttl: Duration::from_secs(604_800),
            access_token_ttl: Duration::from_secs(7200),
            fingerprint_ttl: Duration::from_secs(7200),
        }
    }
}

/// TOTP configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaConfig {
    /// Lifetime of a pending MFA challenge.
    ///
    /// Default: 5 minutes
    pub challenge_ttl: Duration,

    /// Raw secret length in bytes (20 bytes = 32 base32 characters).
    ///
    /// Default: 20
    pub secret_length: usize,

    /// Issuer shown in authenticator apps.
    ///
    /// Default: "Chronoflow"
    pub issuer: String,
}

impl MfaConfig {
    /// Create a new MFA configuration with the given issuer.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            ..Self::default()
        }
    }

    /// Set challenge lifetime.
    #[must_use]
    pub const fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Set secret length in bytes.
    #[must_use]
    pub const fn with_secret_length(mut self, bytes: usize) -> Self {
        self.secret_length = bytes;
        self
    }
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            challenge_ttl: Duration::from_secs(300),
            secret_length: 20,
            issuer: "Chronoflow".to_string(),
        }
    }
}

/// Audit trail worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// Background writers for normal events.
    ///
    /// Default: 2
    pub workers: usize,

    /// Queue slots before writes fall back to the caller.
    ///
    /// Default: 1024
    pub queue_capacity: usize,

    /// Upper bound on a single sink write.
    ///
    /// Default: 3 seconds
    pub write_timeout: Duration,
}

impl AuditConfig {
    /// Create a pool with `workers` writers and `queue_capacity` slots.
    #[must_use]
    pub const fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            write_timeout: Duration::from_secs(3),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::new(2, 1024)
    }
}

/// Federated identity token verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedConfig {
    /// JWKS endpoint of the identity provider.
    pub jwks_uri: String,

    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected `aud` claim (project or client id).
    pub audience: String,

    /// Clock skew tolerance for `exp`/`nbf`.
    ///
    /// Default: 60 seconds
    pub leeway: Duration,

    /// How long a fetched key set is reused.
    ///
    /// Default: 1 hour
    pub jwks_cache_ttl: Duration,

    /// Sign-in method assumed when the token carries no
    /// `firebase.sign_in_provider` claim.
    pub fallback_sign_in_provider: String,
}

impl FederatedConfig {
    /// Firebase Authentication for the given project.
    #[must_use]
    pub fn firebase(project_id: &str) -> Self {
        Self {
            jwks_uri: "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com".to_string(),
            issuer: format!("https://securetoken.google.com/{project_id}"),
            audience: project_id.to_string(),
            leeway: Duration::from_secs(60),
            jwks_cache_ttl: Duration::from_secs(3600),
            fallback_sign_in_provider: "custom".to_string(),
        }
    }

    /// Google Sign-In ID tokens issued to a mobile client.
    #[must_use]
    pub fn google(client_id: &str) -> Self {
        Self {
            jwks_uri: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
            issuer: "https://accounts.google.com".to_string(),
            audience: client_id.to_string(),
            leeway: Duration::from_secs(60),
            jwks_cache_ttl: Duration::from_secs(3600),
            fallback_sign_in_provider: "google.com".to_string(),
        }
    }

    /// Set clock skew tolerance.
    #[must_use]
    pub const fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }
}

/// Top-level configuration for the security core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Rate limiting.
    pub rate_limit: RateLimitConfig,
    /// Token lifetimes.
    pub tokens: TokenConfig,
    /// TOTP.
    pub mfa: MfaConfig,
    /// Audit pool.
    pub audit: AuditConfig,
    /// Identity mapping cache lifetime.
    ///
    /// Default: 24 hours
    pub identity_mapping_ttl: Duration,
    /// Upper bound on any single store or identity provider call.
    ///
    /// Default: 3 seconds
    pub store_timeout: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            tokens: TokenConfig::default(),
            mfa: MfaConfig::default(),
            audit: AuditConfig::default(),
            identity_mapping_ttl: Duration::from_secs(86_400),
            store_timeout: Duration::from_secs(3),
        }
    }
}

impl SecurityConfig {
    /// Set rate limiting.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set token lifetimes.
    #[must_use]
    pub const fn with_tokens(mut self, tokens: TokenConfig) -> Self {
        self.tokens = tokens;
        self
    }

    /// Set TOTP configuration.
    #[must_use]
    pub fn with_mfa(mut self, mfa: MfaConfig) -> Self {
        self.mfa = mfa;
        self
    }

    /// Set audit pool size.
    #[must_use]
    pub const fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    /// Set the store call timeout.
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Defaults overlaid with `CHRONOFLOW_SECURITY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] if a value is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let env = EnvReader { lookup: &lookup };

        if let Some(v) = env.parse::<u32>("RATE_LIMIT_MAX_ATTEMPTS")? {
            config.rate_limit.max_attempts = v;
        }
        if let Some(v) = env.seconds("RATE_LIMIT_WINDOW_SECONDS")? {
            config.rate_limit.window = v;
        }
        if let Some(v) = env.seconds("REFRESH_TOKEN_TTL_SECONDS")? {
            config.tokens.refresh_token_ttl = v;
        }
        if let Some(v) = env.seconds("ACCESS_TOKEN_TTL_SECONDS")? {
            config.tokens.access_token_ttl = v;
        }
        if let Some(v) = env.seconds("FINGERPRINT_TTL_SECONDS")? {
            config.tokens.fingerprint_ttl = v;
        }
        if let Some(v) = env.seconds("MFA_CHALLENGE_TTL_SECONDS")? {
            config.mfa.challenge_ttl = v;
        }
        if let Some(v) = env.parse::<usize>("MFA_SECRET_LENGTH")? {
            config.mfa.secret_length = v;
        }
        if let Some(v) = lookup("CHRONOFLOW_SECURITY_TOTP_ISSUER") {
            config.mfa.issuer = v;
        }
        if let Some(v) = env.seconds("IDENTITY_MAPPING_TTL_SECONDS")? {
            config.identity_mapping_ttl = v;
        }
        if let Some(v) = env.parse::<u64>("STORE_TIMEOUT_MS")? {
            config.store_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env.parse::<usize>("AUDIT_WORKERS")? {
            config.audit.workers = v;
        }
        if let Some(v) = env.parse::<usize>("AUDIT_QUEUE_CAPACITY")? {
            config.audit.queue_capacity = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants between values.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_attempts == 0 {
            return Err(AuthError::ConfigError(
                "rate limit max attempts must be positive".into(),
            ));
        }
        if self.rate_limit.window.is_zero() || self.tokens.refresh_token_ttl.is_zero() {
            return Err(AuthError::ConfigError("windows and TTLs must be positive".into()));
        }
        // RFC 4226 requires at least 128 bits of shared secret.
        if self.mfa.secret_length < 16 {
            return Err(AuthError::ConfigError(
                "MFA secret length must be at least 16 bytes".into(),
            ));
        }
        if self.audit.workers == 0 || self.audit.queue_capacity == 0 {
            return Err(AuthError::ConfigError(
                "audit pool needs at least one worker and one queue slot".into(),
            ));
        }
        Ok(())
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        let key = format!("CHRONOFLOW_SECURITY_{name}");
        (self.lookup)(&key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|_| AuthError::ConfigError(format!("{key} is not valid: {raw}")))
            })
            .transpose()
    }

    fn seconds(&self, name: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SecurityConfig::default();
        assert_eq!(config.rate_limit.max_attempts, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(900));
        assert_eq!(config.tokens.refresh_token_ttl, Duration::from_secs(604_800));
        assert_eq!(config.tokens.fingerprint_ttl, Duration::from_secs(7200));
        assert_eq!(config.mfa.challenge_ttl, Duration::from_secs(300));
        assert_eq!(config.mfa.secret_length, 20);
        assert_eq!(config.mfa.issuer, "Chronoflow");
        assert_eq!(config.audit.queue_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHRONOFLOW_SECURITY_RATE_LIMIT_MAX_ATTEMPTS", "5"),
            ("CHRONOFLOW_SECURITY_RATE_LIMIT_WINDOW_SECONDS", "60"),
            ("CHRONOFLOW_SECURITY_STORE_TIMEOUT_MS", "250"),
            ("CHRONOFLOW_SECURITY_TOTP_ISSUER", "Acme"),
        ]);

        let config = SecurityConfig::from_lookup(|k| vars.get(k).map(ToString::to_string))
            .expect("valid overrides");

        assert_eq!(config.rate_limit, RateLimitConfig::new(5, Duration::from_secs(60)));
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.mfa.issuer, "Acme");
        assert_eq!(config.tokens, TokenConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = SecurityConfig::from_lookup(|k| {
            (k == "CHRONOFLOW_SECURITY_MFA_CHALLENGE_TTL_SECONDS").then(|| "five".to_string())
        });
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_validate_short_secret() {
        let config = SecurityConfig::default().with_mfa(MfaConfig::default().with_secret_length(8));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_firebase_config() {
        let config = FederatedConfig::firebase("chronoflow-prod");
        assert_eq!(config.issuer, "https://securetoken.google.com/chronoflow-prod");
        assert_eq!(config.audience, "chronoflow-prod");

        let google = FederatedConfig::google("client-123.apps.googleusercontent.com");
        assert_eq!(google.fallback_sign_in_provider, "google.com");
    }
}
