//! Explicit per-request execution context.
//!
//! Every flow receives a [`RequestContext`] instead of reading client
//! details or the current user from ambient state. Pre-authentication
//! lookups that must cross tenant boundaries ask for it through
//! [`TenantScope::CrossTenant`] rather than a hidden bypass flag.

use crate::error::{AuthError, Result};
use crate::state::{TenantId, UserId};

/// Tenant visibility for a credential repository call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    /// Only rows belonging to this tenant.
    Tenant(TenantId),
    /// All tenants. Used before the caller's tenant is known.
    CrossTenant,
}

impl TenantScope {
    /// Returns `true` if `tenant_id` is visible in this scope.
    #[must_use]
    pub fn allows(&self, tenant_id: TenantId) -> bool {
        match self {
            Self::Tenant(scoped) => *scoped == tenant_id,
            Self::CrossTenant => true,
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    /// Authenticated user.
    pub user_id: UserId,
    /// Their tenant.
    pub tenant_id: TenantId,
}

impl Principal {
    /// Scope limited to this principal's tenant.
    #[must_use]
    pub const fn scope(&self) -> TenantScope {
        TenantScope::Tenant(self.tenant_id)
    }
}

/// Client details and (optionally) the authenticated principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Client IP address as seen by the edge.
    pub client_ip: Option<String>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// Bearer access token presented with the request.
    pub access_token: Option<String>,
    /// Authenticated caller, if any.
    pub principal: Option<Principal>,
    /// Distributed trace id for audit correlation.
    pub trace_id: Option<String>,
}

impl RequestContext {
    /// Anonymous context for a client.
    #[must_use]
    pub fn new(client_ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client_ip: Some(client_ip.into()),
            user_agent: Some(user_agent.into()),
            ..Self::default()
        }
    }

    /// Attach an authenticated principal.
    #[must_use]
    pub const fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Attach the presented access token.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Attach a trace id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// The authenticated principal.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] if the request is anonymous.
    pub fn require_principal(&self) -> Result<Principal> {
        self.principal.ok_or(AuthError::Unauthenticated)
    }

    /// Client IP or `"unknown"`.
    #[must_use]
    pub fn ip_or_unknown(&self) -> &str {
        self.client_ip.as_deref().unwrap_or(crate::constants::UNKNOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_scope() {
        let scope = TenantScope::Tenant(TenantId(7));
        assert!(scope.allows(TenantId(7)));
        assert!(!scope.allows(TenantId(8)));
        assert!(TenantScope::CrossTenant.allows(TenantId(8)));
    }

    #[test]
    fn test_require_principal() {
        let ctx = RequestContext::new("10.0.0.1", "curl/8");
        assert_eq!(ctx.require_principal(), Err(AuthError::Unauthenticated));

        let principal = Principal {
            user_id: UserId(1),
            tenant_id: TenantId(1),
        };
        let ctx = ctx.with_principal(principal);
        assert_eq!(ctx.require_principal(), Ok(principal));
    }
}
