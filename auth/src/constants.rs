//! Security core constants.
//!
//! Storage key prefixes, rate-limited endpoint names and the trusted
//! sign-in provider catalogue.

/// Placeholder for a missing client attribute.
pub const UNKNOWN: &str = "unknown";

/// Role granted to auto-registered accounts.
pub const DEFAULT_ROLE: &str = "organizer";

/// Storage key prefixes.
pub mod keys {
    /// `auth:refresh_token:{token}` → `"{user_id}:{family_id}"`.
    pub const REFRESH_TOKEN: &str = "auth:refresh_token:";

    /// `auth:refresh_family:{family_id}` → active token.
    pub const REFRESH_FAMILY: &str = "auth:refresh_family:";

    /// `auth:refresh_family_members:{family_id}` → set of every token in the family.
    pub const REFRESH_FAMILY_MEMBERS: &str = "auth:refresh_family_members:";

    /// `auth:token_fingerprint:{access_token}` → fingerprint hash.
    pub const TOKEN_FINGERPRINT: &str = "auth:token_fingerprint:";

    /// `auth:mfa_token:{challenge_id}` → pending challenge.
    pub const MFA_TOKEN: &str = "auth:mfa_token:";

    /// `auth:rate_limit:{ip}:{endpoint}` → counter.
    pub const RATE_LIMIT: &str = "auth:rate_limit:";

    /// `auth:access_token:{token}` → access session.
    pub const ACCESS_TOKEN: &str = "auth:access_token:";

    /// `auth:user_access_tokens:{user_id}` → set of live access tokens.
    pub const USER_ACCESS_TOKENS: &str = "auth:user_access_tokens:";

    /// `firebase:uid:to:internal:{external_id}` → user id.
    pub const EXTERNAL_TO_INTERNAL: &str = "firebase:uid:to:internal:";

    /// `firebase:internal:to:uid:{user_id}` → external id.
    pub const INTERNAL_TO_EXTERNAL: &str = "firebase:internal:to:uid:";

    /// `security:audit:log:{yyyy-mm-dd}` → list of audit entries.
    pub const AUDIT_LOG: &str = "security:audit:log:";
}

/// Endpoint names used as rate limit bucket keys.
pub mod endpoints {
    /// Password login.
    pub const LOGIN: &str = "login";

    /// Federated token login.
    pub const FEDERATED_LOGIN: &str = "federated-login";

    /// Federated registration.
    pub const FEDERATED_REGISTER: &str = "federated-register";

    /// MFA code verification.
    pub const MFA_VERIFY: &str = "mfa-verify";
}

/// Sign-in methods whose identity assertion is trusted without a local
/// email verification check.
pub const TRUSTED_SIGN_IN_PROVIDERS: &[&str] = &[
    "google.com",
    "facebook.com",
    "apple.com",
    "microsoft.com",
    "twitter.com",
    "github.com",
];

/// Prefixes of enterprise SSO sign-in methods (`saml.acme`, `oidc.okta`).
pub const TRUSTED_SIGN_IN_PREFIXES: &[&str] = &["saml.", "oidc."];

/// Fields always masked before an operation input is recorded.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "rawPassword",
    "totpSecret",
    "secret",
    "token",
    "refreshToken",
];

/// Mask written in place of a redacted value.
pub const REDACTED: &str = "***";

/// Audit request body limit in characters.
pub const MAX_AUDIT_BODY_CHARS: usize = 4000;

/// Audit result message limit in characters.
pub const MAX_AUDIT_MESSAGE_CHARS: usize = 512;

/// Days a daily audit list is retained in Redis.
pub const AUDIT_RETENTION_DAYS: i64 = 7;
