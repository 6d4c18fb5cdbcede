//! # Chronoflow Session & Token Security Core
//!
//! Authentication and session security for the Chronoflow backend:
//! who may sign in, how sessions are issued and rotated, and which
//! security events are recorded.
//!
//! ## Components
//!
//! - [`verifier::CredentialVerifier`]: passwords (bcrypt) and federated
//!   identity tokens, the email trust policy and auto-registration
//! - [`identity::IdentityMapper`]: federated subject ↔ internal user id
//! - [`rate_limit::RateLimiter`]: fixed-window limits per client IP and endpoint
//! - [`mfa::MfaChallengeManager`]: TOTP enrollment and single-use login challenges
//! - [`refresh::RefreshTokenAuthority`]: refresh token families with
//!   rotation and reuse detection
//! - [`fingerprint::FingerprintBinder`]: access token ↔ client context binding
//! - [`audit::SecurityAuditTrail`]: critical events written synchronously,
//!   the rest through a bounded worker pool
//! - [`session::SessionEstablisher`]: the login, MFA, refresh and logout flows
//!
//! ## Architecture
//!
//! Components depend on the provider traits in [`providers`]; the
//! [`stores`] module implements them over Redis and `PostgreSQL`, and
//! [`mocks`] over memory for tests.
//!
//! ```text
//! RequestContext ─▶ SessionEstablisher ─▶ components ─▶ providers ─▶ Redis / PostgreSQL
//!                          │
//!                          └──────────▶ SecurityAuditTrail ─▶ AuditSink
//! ```
//!
//! ## Example: password login
//!
//! ```rust,ignore
//! use chronoflow_auth::*;
//!
//! let establisher = SessionEstablisher::new(env, SecurityConfig::from_env()?, cipher)?;
//! let ctx = RequestContext::new("203.0.113.7", "Mozilla/5.0");
//!
//! match establisher.login(&ctx, PasswordLogin::new("alice", "s3cret", true)).await? {
//!     LoginOutcome::Authenticated(session) => { /* hand out tokens */ }
//!     LoginOutcome::MfaRequired { mfa_token } => { /* ask for the TOTP code */ }
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod audit;
pub mod config;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod environment;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod mfa;
pub mod providers;
pub mod rate_limit;
pub mod refresh;
pub mod session;
pub mod state;
pub mod stores;
pub mod utils;
pub mod verifier;

// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use audit::{AuditEntry, AuditQuery, SecurityAuditTrail, SecurityEvent};
pub use config::SecurityConfig;
pub use context::{Principal, RequestContext, TenantScope};
pub use crypto::SecretCipher;
pub use environment::SecurityEnvironment;
pub use error::{AuthError, Result};
pub use session::SessionEstablisher;
pub use state::{
    Credential, FederatedRegistration, LoginOutcome, PasswordLogin, Session, TenantId, UserId,
};
