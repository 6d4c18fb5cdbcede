//! Explicit audit decorator for application operations.
//!
//! Each audited use case declares an [`OperationDescriptor`] once and
//! routes calls through [`AuditedOperation::run`]:
//!
//! ```no_run
//! use chronoflow_auth::audit::{AuditType, AuditedOperation, OperationDescriptor};
//! use chronoflow_auth::mocks::MockAuditSink;
//! use chronoflow_auth::RequestContext;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct DisableUser {
//!     user_id: i64,
//!     reason: String,
//! }
//!
//! const DISABLE_USER: OperationDescriptor<DisableUser> = OperationDescriptor {
//!     name: "DISABLE_USER",
//!     module: "user",
//!     audit_type: AuditType::AdminAction,
//!     target_type: Some("user"),
//!     target_id: |input| Some(input.user_id.to_string()),
//!     redact: &[],
//!     record_request_body: true,
//! };
//!
//! # async fn example(audited: AuditedOperation<MockAuditSink>, ctx: RequestContext) {
//! let input = DisableUser { user_id: 7, reason: "left company".into() };
//! let result: Result<(), String> = audited
//!     .run(&DISABLE_USER, &ctx, &input, async { Ok(()) })
//!     .await;
//! # }
//! ```

use super::{Actor, AuditEntry, AuditType, RESULT_FAILURE, RESULT_SUCCESS, SecurityAuditTrail};
use crate::constants::{MAX_AUDIT_BODY_CHARS, MAX_AUDIT_MESSAGE_CHARS, REDACTED, SENSITIVE_FIELDS};
use crate::context::RequestContext;
use crate::providers::AuditSink;
use crate::utils::truncate_chars;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

/// Static description of an audited operation.
pub struct OperationDescriptor<I> {
    /// Operation name recorded in the log.
    pub name: &'static str,
    /// Owning module.
    pub module: &'static str,
    /// Category.
    pub audit_type: AuditType,
    /// Kind of object the operation touches.
    pub target_type: Option<&'static str>,
    /// Extracts the affected object's id from the input.
    pub target_id: fn(&I) -> Option<String>,
    /// Extra input fields to mask, on top of the built-in sensitive set.
    pub redact: &'static [&'static str],
    /// Whether to store the (redacted) input.
    pub record_request_body: bool,
}

impl<I> Clone for OperationDescriptor<I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I> Copy for OperationDescriptor<I> {}

impl<I> std::fmt::Debug for OperationDescriptor<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("audit_type", &self.audit_type)
            .finish_non_exhaustive()
    }
}

impl<I: Serialize> OperationDescriptor<I> {
    /// Serialize `input` with sensitive fields masked and the result truncated.
    #[must_use]
    pub fn redacted_body(&self, input: &I) -> Option<String> {
        let mut value = serde_json::to_value(input).ok()?;
        redact_value(&mut value, self.redact);
        Some(truncate_chars(&value.to_string(), MAX_AUDIT_BODY_CHARS))
    }
}

/// Runs operations and records their outcome on the audit trail.
#[derive(Debug, Clone)]
pub struct AuditedOperation<S: AuditSink> {
    trail: SecurityAuditTrail<S>,
}

impl<S: AuditSink> AuditedOperation<S> {
    /// Wrap a trail.
    #[must_use]
    pub const fn new(trail: SecurityAuditTrail<S>) -> Self {
        Self { trail }
    }

    /// Await `operation`, then record it asynchronously.
    ///
    /// The operation's result is returned unchanged; audit problems are
    /// logged by the trail and never surface here.
    ///
    /// # Errors
    ///
    /// Returns whatever `operation` returns.
    pub async fn run<I, T, E, F>(
        &self,
        descriptor: &OperationDescriptor<I>,
        ctx: &RequestContext,
        input: &I,
        operation: F,
    ) -> Result<T, E>
    where
        I: Serialize,
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = operation.await;
        let elapsed = started.elapsed();

        let (result_code, result_msg) = match &result {
            Ok(_) => (RESULT_SUCCESS, None),
            Err(e) => (
                RESULT_FAILURE,
                Some(truncate_chars(&e.to_string(), MAX_AUDIT_MESSAGE_CHARS)),
            ),
        };

        let actor = Actor::from(ctx.principal.map(|p| p.user_id));
        let entry = AuditEntry {
            id: uuid::Uuid::new_v4(),
            trace_id: ctx.trace_id.clone(),
            actor_id: match actor {
                Actor::User(id) => Some(id),
                _ => None,
            },
            external_actor_id: None,
            client_ip: ctx.client_ip.clone(),
            user_agent: ctx.user_agent.clone(),
            module: descriptor.module.to_string(),
            operation: descriptor.name.to_string(),
            audit_type: descriptor.audit_type,
            target_type: descriptor.target_type.map(str::to_string),
            target_id: (descriptor.target_id)(input),
            request_body: if descriptor.record_request_body {
                descriptor.redacted_body(input)
            } else {
                None
            },
            result_code,
            result_msg,
            duration_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            created_at: Utc::now(),
        };

        self.trail.record_entry(entry).await;
        result
    }
}

fn is_sensitive(key: &str, extra: &[&str]) -> bool {
    SENSITIVE_FIELDS
        .iter()
        .chain(extra)
        .any(|field| field.eq_ignore_ascii_case(key))
}

fn redact_value(value: &mut Value, extra: &[&str]) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if is_sensitive(key, extra) {
                    *inner = Value::String(REDACTED.to_string());
                } else {
                    redact_value(inner, extra);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_value(item, extra);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::context::Principal;
    use crate::mocks::MockAuditSink;
    use crate::state::{TenantId, UserId};

    #[derive(Serialize)]
    struct ChangePassword {
        user_id: i64,
        password: String,
        profile: Profile,
    }

    #[derive(Serialize)]
    struct Profile {
        nickname: String,
        #[serde(rename = "totpSecret")]
        totp_secret: String,
        phone: String,
    }

    const CHANGE_PASSWORD: OperationDescriptor<ChangePassword> = OperationDescriptor {
        name: "CHANGE_PASSWORD",
        module: "user",
        audit_type: AuditType::DataChange,
        target_type: Some("user"),
        target_id: |input| Some(input.user_id.to_string()),
        redact: &["phone"],
        record_request_body: true,
    };

    fn input() -> ChangePassword {
        ChangePassword {
            user_id: 7,
            password: "hunter2".into(),
            profile: Profile {
                nickname: "al".into(),
                totp_secret: "JBSWY3DP".into(),
                phone: "+65 1234".into(),
            },
        }
    }

    #[test]
    fn test_redaction_is_recursive() {
        let body = CHANGE_PASSWORD.redacted_body(&input()).unwrap_or_default();

        assert!(!body.contains("hunter2"));
        assert!(!body.contains("JBSWY3DP"));
        assert!(!body.contains("+65 1234"), "descriptor-specific field redacted");
        assert!(body.contains("\"nickname\":\"al\""));
        assert!(body.contains("\"password\":\"***\""));
    }

    #[tokio::test]
    async fn test_run_records_success_and_failure() {
        let sink = MockAuditSink::new();
        let trail = SecurityAuditTrail::new(sink.clone(), &AuditConfig::default());
        let audited = AuditedOperation::new(trail.clone());
        let ctx = RequestContext::new("10.0.0.9", "test-agent").with_principal(Principal {
            user_id: UserId(1),
            tenant_id: TenantId(1),
        });

        let ok: Result<u32, String> = audited
            .run(&CHANGE_PASSWORD, &ctx, &input(), async { Ok(5) })
            .await;
        assert_eq!(ok, Ok(5));

        let err: Result<u32, String> = audited
            .run(&CHANGE_PASSWORD, &ctx, &input(), async { Err("weak password".to_string()) })
            .await;
        assert_eq!(err, Err("weak password".to_string()), "result passes through");

        trail.shutdown().await;
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);

        let failed = entries
            .iter()
            .find(|e| e.result_code == RESULT_FAILURE)
            .map(|e| (e.result_msg.clone(), e.target_id.clone(), e.actor_id));
        assert_eq!(
            failed,
            Some((Some("weak password".to_string()), Some("7".to_string()), Some(UserId(1))))
        );
        assert!(entries.iter().all(|e| e.module == "user" && e.audit_type == AuditType::DataChange));
    }
}
