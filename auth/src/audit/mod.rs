//! Security audit trail.
//!
//! Append-only record of security-relevant events. Entries are classified
//! by a static table:
//!
//! - **Critical** events (refresh token reuse, fingerprint mismatch) are
//!   persisted before [`SecurityAuditTrail::record`] returns.
//! - **Normal** events go to a bounded worker pool. When the queue is
//!   full the write runs on the caller instead of being dropped.
//!
//! Persistence failures are logged and swallowed in both cases. An audit
//! sink outage never turns a successful login into a failed one.
//!
//! Application operations outside the security flows are audited through
//! [`AuditedOperation`], which takes an explicit [`OperationDescriptor`]
//! instead of reflective annotations.

use crate::state::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod operation;
pub mod trail;

pub use operation::{AuditedOperation, OperationDescriptor};
pub use trail::SecurityAuditTrail;

/// Module name recorded for security events.
pub const SECURITY_MODULE: &str = "security";

/// Result code for successful operations.
pub const RESULT_SUCCESS: i32 = 0;

/// Result code for failed or rejected operations.
pub const RESULT_FAILURE: i32 = -1;

/// Security events tracked by the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEvent {
    // Authentication
    /// Session established.
    LoginSuccess,
    /// Wrong password or unknown user.
    LoginFailedBadCredentials,
    /// Federated login with an unverified email on an untrusted method.
    LoginFailedEmailNotVerified,
    /// Federated identity with no account and no auto-registration.
    LoginFailedUserNotFound,
    /// Account disabled.
    LoginFailedAccountDisabled,
    /// Federated token failed verification.
    LoginFailedInvalidToken,

    // Registration
    /// Account created.
    UserRegistered,

    // Tokens
    /// Refresh token rotated.
    TokenRefreshed,
    /// Access token used from a different client context.
    TokenFingerprintMismatch,
    /// Superseded refresh token presented again.
    RefreshTokenReuseDetected,

    // Sessions
    /// Session ended by the user.
    Logout,

    // Authorization
    /// Access denied.
    PermissionDenied,

    // Rate limiting
    /// Attempt rejected by the rate limiter.
    RateLimitExceeded,

    // Second factor
    /// Password accepted, TOTP code requested.
    MfaChallengeIssued,
    /// TOTP code accepted.
    MfaVerified,
    /// TOTP code rejected.
    MfaFailed,
    /// TOTP enrolled.
    MfaEnabled,
    /// TOTP removed.
    MfaDisabled,
}

impl SecurityEvent {
    /// Events persisted synchronously.
    pub const CRITICAL: &'static [Self] = &[
        Self::RefreshTokenReuseDetected,
        Self::TokenFingerprintMismatch,
    ];

    /// Events recorded with [`RESULT_FAILURE`].
    pub const FAILURES: &'static [Self] = &[
        Self::LoginFailedBadCredentials,
        Self::LoginFailedEmailNotVerified,
        Self::LoginFailedUserNotFound,
        Self::LoginFailedAccountDisabled,
        Self::LoginFailedInvalidToken,
        Self::TokenFingerprintMismatch,
        Self::RefreshTokenReuseDetected,
        Self::PermissionDenied,
        Self::RateLimitExceeded,
        Self::MfaFailed,
    ];

    /// Returns `true` if the event must be durable before `record` returns.
    #[must_use]
    pub fn is_critical(self) -> bool {
        Self::CRITICAL.contains(&self)
    }

    /// Result code for this event.
    #[must_use]
    pub fn result_code(self) -> i32 {
        if Self::FAILURES.contains(&self) {
            RESULT_FAILURE
        } else {
            RESULT_SUCCESS
        }
    }

    /// Stable operation name (`LOGIN_SUCCESS`, …).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailedBadCredentials => "LOGIN_FAILED_BAD_CREDENTIALS",
            Self::LoginFailedEmailNotVerified => "LOGIN_FAILED_EMAIL_NOT_VERIFIED",
            Self::LoginFailedUserNotFound => "LOGIN_FAILED_USER_NOT_FOUND",
            Self::LoginFailedAccountDisabled => "LOGIN_FAILED_ACCOUNT_DISABLED",
            Self::LoginFailedInvalidToken => "LOGIN_FAILED_INVALID_TOKEN",
            Self::UserRegistered => "USER_REGISTERED",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::TokenFingerprintMismatch => "TOKEN_FINGERPRINT_MISMATCH",
            Self::RefreshTokenReuseDetected => "REFRESH_TOKEN_REUSE_DETECTED",
            Self::Logout => "LOGOUT",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::MfaChallengeIssued => "MFA_CHALLENGE_ISSUED",
            Self::MfaVerified => "MFA_VERIFIED",
            Self::MfaFailed => "MFA_FAILED",
            Self::MfaEnabled => "MFA_ENABLED",
            Self::MfaDisabled => "MFA_DISABLED",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditType {
    /// Authentication and token events.
    Security,
    /// Administrative actions.
    AdminAction,
    /// Business data changes.
    DataChange,
    /// Generic API access.
    ApiAccess,
}

impl AuditType {
    /// Numeric code stored in the `type` column.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::Security => 1,
            Self::AdminAction => 2,
            Self::DataChange => 3,
            Self::ApiAccess => 4,
        }
    }

    /// Inverse of [`code`](Self::code).
    #[must_use]
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Security),
            2 => Some(Self::AdminAction),
            3 => Some(Self::DataChange),
            4 => Some(Self::ApiAccess),
            _ => None,
        }
    }
}

/// Who performed an audited action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Known internal user.
    User(UserId),
    /// Federated subject without a resolved internal id.
    External(String),
    /// Pre-authentication request.
    Anonymous,
}

impl Actor {
    /// Numeric ids become [`Actor::User`], anything else [`Actor::External`].
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        raw.parse::<UserId>()
            .map_or_else(|_| Self::External(raw.to_string()), Self::User)
    }
}

impl From<UserId> for Actor {
    fn from(user_id: UserId) -> Self {
        Self::User(user_id)
    }
}

impl From<Option<UserId>> for Actor {
    fn from(user_id: Option<UserId>) -> Self {
        user_id.map_or(Self::Anonymous, Self::User)
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry id.
    pub id: uuid::Uuid,
    /// Distributed trace id.
    pub trace_id: Option<String>,
    /// Internal actor id, if numeric.
    pub actor_id: Option<UserId>,
    /// Non-numeric actor id (federated uid).
    pub external_actor_id: Option<String>,
    /// Client IP.
    pub client_ip: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Module (`security` for security events).
    pub module: String,
    /// Operation or event name.
    pub operation: String,
    /// Category.
    pub audit_type: AuditType,
    /// Kind of the affected object.
    pub target_type: Option<String>,
    /// Id of the affected object.
    pub target_id: Option<String>,
    /// Redacted, truncated input.
    pub request_body: Option<String>,
    /// 0 on success, -1 on failure.
    pub result_code: i32,
    /// Free-text detail.
    pub result_msg: Option<String>,
    /// Elapsed time of the audited operation.
    pub duration_ms: Option<u64>,
    /// Write time.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry for a security event.
    #[must_use]
    pub fn security(
        event: SecurityEvent,
        actor: &Actor,
        client_ip: Option<&str>,
        detail: impl Into<String>,
    ) -> Self {
        let (actor_id, external_actor_id) = match actor {
            Actor::User(id) => (Some(*id), None),
            Actor::External(raw) => (None, Some(raw.clone())),
            Actor::Anonymous => (None, None),
        };

        Self {
            id: uuid::Uuid::new_v4(),
            trace_id: None,
            actor_id,
            external_actor_id,
            client_ip: client_ip.map(str::to_string),
            user_agent: None,
            module: SECURITY_MODULE.to_string(),
            operation: event.as_str().to_string(),
            audit_type: AuditType::Security,
            target_type: None,
            target_id: None,
            request_body: None,
            result_code: event.result_code(),
            result_msg: Some(crate::utils::truncate_chars(
                &detail.into(),
                crate::constants::MAX_AUDIT_MESSAGE_CHARS,
            )),
            duration_ms: None,
            created_at: Utc::now(),
        }
    }

    /// Returns `true` if this entry records a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.result_code != RESULT_SUCCESS
    }
}

/// Audit log filter. All set fields must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditQuery {
    /// Actor id.
    pub actor_id: Option<UserId>,
    /// Module.
    pub module: Option<String>,
    /// Category.
    pub audit_type: Option<AuditType>,
    /// Substring of the operation name.
    pub operation: Option<String>,
    /// Target kind.
    pub target_type: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub end: Option<DateTime<Utc>>,
    /// 1-based page number.
    pub page_no: u32,
    /// Entries per page.
    pub page_size: u32,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            actor_id: None,
            module: None,
            audit_type: None,
            operation: None,
            target_type: None,
            start: None,
            end: None,
            page_no: 1,
            page_size: 20,
        }
    }
}

impl AuditQuery {
    /// Largest page a caller may request.
    pub const MAX_PAGE_SIZE: u32 = 200;

    /// Filter by actor.
    #[must_use]
    pub const fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Filter by module.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Filter by category.
    #[must_use]
    pub const fn with_type(mut self, audit_type: AuditType) -> Self {
        self.audit_type = Some(audit_type);
        self
    }

    /// Filter by operation substring.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Filter by time range.
    #[must_use]
    pub const fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Select a page.
    #[must_use]
    pub const fn with_page(mut self, page_no: u32, page_size: u32) -> Self {
        self.page_no = page_no;
        self.page_size = page_size;
        self
    }

    /// Page number and size clamped to valid values.
    #[must_use]
    pub fn normalized_page(&self) -> (u32, u32) {
        (
            self.page_no.max(1),
            self.page_size.clamp(1, Self::MAX_PAGE_SIZE),
        )
    }

    /// Rows to skip for the requested page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        let (page_no, page_size) = self.normalized_page();
        u64::from(page_no - 1) * u64::from(page_size)
    }

    /// Returns `true` if `entry` passes every filter.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor_id.is_none_or(|id| entry.actor_id == Some(id))
            && self.module.as_deref().is_none_or(|m| entry.module == m)
            && self.audit_type.is_none_or(|t| entry.audit_type == t)
            && self
                .operation
                .as_deref()
                .is_none_or(|op| entry.operation.contains(op))
            && self
                .target_type
                .as_deref()
                .is_none_or(|t| entry.target_type.as_deref() == Some(t))
            && self.start.is_none_or(|start| entry.created_at >= start)
            && self.end.is_none_or(|end| entry.created_at <= end)
    }

    /// Filter, order newest first and slice `entries` in memory.
    #[must_use]
    pub fn apply(&self, entries: impl IntoIterator<Item = AuditEntry>) -> Page<AuditEntry> {
        let mut matching: Vec<AuditEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let (page_no, page_size) = self.normalized_page();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(self.offset()).unwrap_or(usize::MAX))
            .take(page_size as usize)
            .collect();

        Page {
            items,
            total,
            page_no,
            page_size,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Entries on this page.
    pub items: Vec<T>,
    /// Matching entries across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page_no: u32,
    /// Page size used.
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_classification_tables() {
        assert!(SecurityEvent::RefreshTokenReuseDetected.is_critical());
        assert!(SecurityEvent::TokenFingerprintMismatch.is_critical());
        assert!(!SecurityEvent::LoginSuccess.is_critical());
        assert!(!SecurityEvent::RateLimitExceeded.is_critical());

        assert_eq!(SecurityEvent::LoginSuccess.result_code(), RESULT_SUCCESS);
        assert_eq!(SecurityEvent::Logout.result_code(), RESULT_SUCCESS);
        assert_eq!(SecurityEvent::RateLimitExceeded.result_code(), RESULT_FAILURE);
        assert_eq!(SecurityEvent::LoginFailedBadCredentials.result_code(), RESULT_FAILURE);
    }

    #[test]
    fn test_event_serializes_as_operation_name() {
        let json = serde_json::to_string(&SecurityEvent::RefreshTokenReuseDetected).unwrap_or_default();
        assert_eq!(json, "\"REFRESH_TOKEN_REUSE_DETECTED\"");
    }

    #[test]
    fn test_actor_from_raw() {
        assert_eq!(Actor::from_raw("42"), Actor::User(UserId(42)));
        assert_eq!(
            Actor::from_raw("fb-uid-xyz"),
            Actor::External("fb-uid-xyz".to_string())
        );
    }

    #[test]
    fn test_security_entry_fields() {
        let entry = AuditEntry::security(
            SecurityEvent::LoginFailedInvalidToken,
            &Actor::from_raw("fb-uid-xyz"),
            Some("10.0.0.1"),
            "signature",
        );

        assert_eq!(entry.module, SECURITY_MODULE);
        assert_eq!(entry.operation, "LOGIN_FAILED_INVALID_TOKEN");
        assert_eq!(entry.audit_type, AuditType::Security);
        assert_eq!(entry.actor_id, None);
        assert_eq!(entry.external_actor_id.as_deref(), Some("fb-uid-xyz"));
        assert!(entry.is_failure());
    }

    #[test]
    fn test_query_filters_orders_and_pages() {
        let base = Utc::now();
        let entries: Vec<AuditEntry> = (0..5)
            .map(|i| {
                let mut entry = AuditEntry::security(
                    if i % 2 == 0 { SecurityEvent::LoginSuccess } else { SecurityEvent::Logout },
                    &Actor::User(UserId(7)),
                    None,
                    "",
                );
                entry.created_at = base + Duration::seconds(i);
                entry
            })
            .collect();

        let page = AuditQuery::default()
            .with_actor(UserId(7))
            .with_operation("LOGIN")
            .with_page(1, 2)
            .apply(entries.clone());

        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].created_at > page.items[1].created_at, "newest first");

        let second = AuditQuery::default().with_page(3, 2).apply(entries);
        assert_eq!(second.total, 5);
        assert_eq!(second.items.len(), 1);
    }

    #[test]
    fn test_page_normalization() {
        let query = AuditQuery::default().with_page(0, 10_000);
        assert_eq!(query.normalized_page(), (1, AuditQuery::MAX_PAGE_SIZE));
        assert_eq!(query.offset(), 0);
    }
}
