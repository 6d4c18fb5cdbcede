//! Error types for the session and token security core.

use crate::state::{FamilyId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for security operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error taxonomy for authentication, token and MFA flows.
///
/// Authentication failures carry deliberately generic messages: the
/// caller cannot tell an unknown user from a wrong password, nor which
/// check rejected a federated token. Details go to the log, not here.
///
/// A pending second factor is not an error; see
/// [`LoginOutcome::MfaRequired`](crate::state::LoginOutcome::MfaRequired).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Authentication Errors
    // ═══════════════════════════════════════════════════════════

    /// Unknown user, wrong password, or unverified email on an untrusted method.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The account exists but has been disabled.
    #[error("Account is disabled")]
    AccountDisabled,

    /// A federated identity token failed signature, expiry, issuer or audience checks.
    #[error("Identity provider token verification failed")]
    IdentityProviderVerificationFailed,

    /// The federated identity maps to an email already owned by a different account.
    #[error("Account is already linked to a different identity")]
    AccountLinkConflict,

    /// The operation requires an authenticated principal.
    #[error("Authentication required")]
    Unauthenticated,

    // ═══════════════════════════════════════════════════════════
    // Token Errors
    // ═══════════════════════════════════════════════════════════

    /// Refresh token or MFA challenge token is unknown, expired or consumed.
    #[error("Token expired or unknown")]
    TokenExpiredOrUnknown,

    /// An already-rotated refresh token was presented again.
    ///
    /// The whole family is invalidated and the user must sign in again.
    #[error("Refresh token reuse detected")]
    ReuseDetected {
        /// Owner of the compromised family
        user_id: UserId,
        /// Compromised family
        family_id: FamilyId,
    },

    // ═══════════════════════════════════════════════════════════
    // MFA Errors
    // ═══════════════════════════════════════════════════════════

    /// The submitted TOTP code did not verify.
    #[error("Invalid verification code")]
    MfaInvalidCode,

    // ═══════════════════════════════════════════════════════════
    // Rate Limiting
    // ═══════════════════════════════════════════════════════════

    /// Too many attempts for this endpoint and client.
    #[error("Too many attempts, please retry after {retry_after:?}")]
    RateLimited {
        /// Time until the current window closes
        retry_after: Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// A store or identity provider call did not complete in time.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// Name of the operation that timed out
        operation: &'static str,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Returns `true` if this error is due to invalid user input.
    ///
    /// # Examples
    ///
    /// ```
    /// # use chronoflow_auth::AuthError;
    /// assert!(AuthError::InvalidCredentials.is_user_error());
    /// assert!(!AuthError::InternalError("boom".into()).is_user_error());
    /// ```
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::MfaInvalidCode
                | Self::TokenExpiredOrUnknown
                | Self::AccountLinkConflict
                | Self::Unauthenticated
        )
    }

    /// Returns `true` if this error indicates a security issue.
    ///
    /// # Examples
    ///
    /// ```
    /// # use chronoflow_auth::AuthError;
    /// use std::time::Duration;
    ///
    /// let limited = AuthError::RateLimited { retry_after: Duration::from_secs(60) };
    /// assert!(limited.is_security_issue());
    /// assert!(!AuthError::TokenExpiredOrUnknown.is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::ReuseDetected { .. }
                | Self::RateLimited { .. }
                | Self::IdentityProviderVerificationFailed
        )
    }

    /// Returns `true` if the client must discard its tokens and sign in again.
    #[must_use]
    pub const fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::ReuseDetected { .. } | Self::TokenExpiredOrUnknown | Self::Unauthenticated
        )
    }
}
