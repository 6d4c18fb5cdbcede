//! Core types shared by the security components.
//!
//! Identifiers are newtypes so a user id can never be passed where a
//! tenant id is expected. Everything here is `Clone` and serializable so
//! it can cross store boundaries unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Internal user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Tenant (organization) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Refresh token family identifier.
///
/// One family is created per login and shared by every token that
/// descends from it through rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FamilyId(pub uuid::Uuid);

impl FamilyId {
    /// Generate a new random `FamilyId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for FamilyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FamilyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Credentials
// ═══════════════════════════════════════════════════════════════════════

/// Account status. Accounts are never deleted, only disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Account may sign in.
    Enabled,
    /// Account is locked out.
    Disabled,
}

/// Stored credential record for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Internal user id.
    pub user_id: UserId,
    /// Tenant the user belongs to.
    pub tenant_id: TenantId,
    /// Login name.
    pub username: String,
    /// Email address, if known.
    pub email: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Bcrypt hash; `None` for federated-only accounts.
    pub password_hash: Option<String>,
    /// Enabled or disabled.
    pub status: AccountStatus,
    /// Linked federated identity (e.g. Firebase uid).
    pub external_id: Option<String>,
    /// TOTP secret, encrypted at rest.
    pub mfa_secret: Option<String>,
    /// Whether a second factor is required at login.
    pub mfa_enabled: bool,
    /// Role keys.
    pub roles: Vec<String>,
    /// Last successful login.
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Returns `true` if the account may sign in.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status == AccountStatus::Enabled
    }

    /// Public view of this account.
    #[must_use]
    pub fn user_info(&self) -> UserInfo {
        UserInfo {
            id: self.user_id,
            tenant_id: self.tenant_id,
            username: self.username.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Input for creating an account from a federated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFederatedAccount {
    /// Federated subject id.
    pub external_id: String,
    /// Verified (or trusted) email.
    pub email: String,
    /// Display name.
    pub name: Option<String>,
    /// Name of the tenant container to create.
    pub organization_name: String,
    /// Initial role.
    pub role: String,
}

/// Claims extracted from a verified federated identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    /// Subject id at the identity provider.
    pub external_id: String,
    /// Email claim.
    pub email: Option<String>,
    /// `email_verified` claim.
    pub email_verified: bool,
    /// Sign-in method (e.g. `google.com`, `password`, `saml.acme`).
    pub sign_in_provider: String,
    /// Display name claim.
    pub name: Option<String>,
}

/// Username/password login request.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PasswordLogin {
    /// Username.
    pub username: String,
    /// Plaintext password. Never logged.
    pub password: String,
    /// Issue a refresh token.
    #[serde(default)]
    pub remember_me: bool,
}

impl PasswordLogin {
    /// Create a login request.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>, remember_me: bool) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            remember_me,
        }
    }
}

impl fmt::Debug for PasswordLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordLogin")
            .field("username", &self.username)
            .field("password", &"***")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// Explicit federated registration details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedRegistration {
    /// Display name; falls back to the token's `name` claim.
    pub name: Option<String>,
    /// Tenant container name; falls back to the email local part.
    pub organization_name: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════

/// User details returned to the client with a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Internal user id.
    pub id: UserId,
    /// Tenant id.
    pub tenant_id: TenantId,
    /// Login name.
    pub username: String,
    /// Email.
    pub email: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Role keys.
    pub roles: Vec<String>,
}

/// Server-side record for an issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSession {
    /// Opaque access token.
    pub access_token: String,
    /// Owner.
    pub user_id: UserId,
    /// Owner's tenant.
    pub tenant_id: TenantId,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

/// A fully established session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The signed-in user.
    pub user: UserInfo,
    /// Opaque bearer token.
    pub access_token: String,
    /// Access token expiry.
    pub access_token_expires_at: DateTime<Utc>,
    /// Present when the client asked to be remembered.
    pub refresh_token: Option<String>,
}

/// Result of a login attempt that passed the first factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Session established.
    Authenticated(Session),
    /// Second factor pending; present `mfa_token` with a TOTP code.
    MfaRequired {
        /// Single-use challenge id.
        mfa_token: String,
    },
}

impl LoginOutcome {
    /// The session, if one was established.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::MfaRequired { .. } => None,
        }
    }

    /// Returns `true` if a second factor is pending.
    #[must_use]
    pub const fn is_mfa_required(&self) -> bool {
        matches!(self, Self::MfaRequired { .. })
    }
}

/// TOTP enrollment material shown to the user once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpSetup {
    /// Base32 secret for manual entry.
    pub secret: String,
    /// `data:image/png;base64,…` QR code of `totp_uri`.
    pub qr_code_data_uri: String,
    /// `otpauth://totp/…` provisioning URI.
    pub totp_uri: String,
}

/// Successful refresh token rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatedToken {
    /// Owner of the family.
    pub user_id: UserId,
    /// Family (unchanged by rotation).
    pub family_id: FamilyId,
    /// The new active token.
    pub token: String,
}
