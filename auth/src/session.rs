//! Login, refresh and logout flows.
//!
//! [`SessionEstablisher`] is the boundary of the security core. It
//! composes the rate limiter, credential verifier, MFA manager, refresh
//! token authority, fingerprint binder and audit trail into the
//! operations the transport layer exposes.
//!
//! # Password login
//!
//! ```text
//! rate limit ─▶ authenticate ─┬─ TOTP on ──▶ challenge ─▶ MfaRequired { mfa_token }
//!                             └─ TOTP off ─▶ access token + fingerprint
//!                                            (+ refresh family if remember_me)
//! ```
//!
//! # Refresh
//!
//! ```text
//! rotate ─┬─ Rotated ───────▶ new access token + rotated refresh token
//!         └─ ReuseDetected ─▶ critical audit ─▶ drop every session of the user
//!                              ─▶ Err(ReuseDetected)
//! ```
//!
//! Every store and identity provider call is bounded by
//! [`SecurityConfig::store_timeout`]; a timeout fails the flow.

use crate::audit::{
    Actor, AuditEntry, AuditQuery, AuditType, AuditedOperation, OperationDescriptor, Page,
    SecurityAuditTrail, SecurityEvent,
};
use crate::config::SecurityConfig;
use crate::constants::endpoints;
use crate::context::{Principal, RequestContext, TenantScope};
use crate::crypto::SecretCipher;
use crate::environment::SecurityEnvironment;
use crate::error::{AuthError, Result};
use crate::fingerprint::FingerprintBinder;
use crate::identity::IdentityMapper;
use crate::mfa::MfaChallengeManager;
use crate::providers::{
    AccessSessionStore, AttemptCounter, AuditQueryStore, AuditSink, CredentialRepository,
    FingerprintStore, IdentityMappingCache, IdentityProvider, MfaChallengeStore,
    RefreshTokenStore,
};
use crate::rate_limit::RateLimiter;
use crate::refresh::RefreshTokenAuthority;
use crate::state::{
    AccessSession, Credential, FamilyId, FederatedIdentity, FederatedRegistration, LoginOutcome,
    PasswordLogin, Session, TotpSetup, UserId,
};
use crate::utils::{expires_after, generate_token, with_timeout};
use crate::verifier::CredentialVerifier;
use chrono::Utc;
use std::future::Future;

const REGISTER_FEDERATED: OperationDescriptor<FederatedRegistration> = OperationDescriptor {
    name: "REGISTER_FEDERATED",
    module: "auth",
    audit_type: AuditType::DataChange,
    target_type: Some("user"),
    target_id: |_| None,
    redact: &[],
    record_request_body: true,
};

const QUERY_AUDIT_LOG: OperationDescriptor<AuditQuery> = OperationDescriptor {
    name: "QUERY_AUDIT_LOG",
    module: "audit",
    audit_type: AuditType::ApiAccess,
    target_type: Some("audit_log"),
    target_id: |query| query.actor_id.map(|id| id.to_string()),
    redact: &[],
    record_request_body: true,
};

/// Orchestrates the session lifecycle.
pub struct SessionEstablisher<R, P, M, T, C, F, A, L, S>
where
    R: CredentialRepository + Clone,
    P: IdentityProvider + Clone,
    M: IdentityMappingCache + Clone,
    T: RefreshTokenStore + Clone,
    C: MfaChallengeStore + Clone,
    F: FingerprintStore + Clone,
    A: AccessSessionStore + Clone,
    L: AttemptCounter + Clone,
    S: AuditSink,
{
    credentials: R,
    verifier: CredentialVerifier<R, P>,
    identities: IdentityMapper<M, R>,
    refresh: RefreshTokenAuthority<T>,
    mfa: MfaChallengeManager<C>,
    fingerprints: FingerprintBinder<F, S>,
    sessions: A,
    rate_limiter: RateLimiter<L>,
    audit: SecurityAuditTrail<S>,
    operations: AuditedOperation<S>,
    audit_store: S,
    config: SecurityConfig,
}

impl<R, P, M, T, C, F, A, L, S> SessionEstablisher<R, P, M, T, C, F, A, L, S>
where
    R: CredentialRepository + Clone,
    P: IdentityProvider + Clone,
    M: IdentityMappingCache + Clone,
    T: RefreshTokenStore + Clone,
    C: MfaChallengeStore + Clone,
    F: FingerprintStore + Clone,
    A: AccessSessionStore + Clone,
    L: AttemptCounter + Clone,
    S: AuditSink,
{
    /// Wire the components over `env`.
    ///
    /// Starts the audit worker pool, so it must run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] if `config` is invalid.
    pub fn new(
        env: SecurityEnvironment<R, P, M, T, C, F, A, L, S>,
        config: SecurityConfig,
        cipher: SecretCipher,
    ) -> Result<Self> {
        config.validate()?;

        let audit = SecurityAuditTrail::new(env.audit_sink.clone(), &config.audit);
        Ok(Self {
            verifier: CredentialVerifier::new(env.credentials.clone(), env.identity_provider),
            identities: IdentityMapper::new(
                env.identity_cache,
                env.credentials.clone(),
                config.identity_mapping_ttl,
            ),
            refresh: RefreshTokenAuthority::new(env.refresh_tokens, config.tokens.refresh_token_ttl),
            mfa: MfaChallengeManager::new(env.challenges, config.mfa.clone(), cipher),
            fingerprints: FingerprintBinder::new(
                env.fingerprints,
                audit.clone(),
                config.tokens.fingerprint_ttl,
            ),
            sessions: env.sessions,
            rate_limiter: RateLimiter::new(env.attempts, config.rate_limit.clone()),
            operations: AuditedOperation::new(audit.clone()),
            audit,
            audit_store: env.audit_sink,
            credentials: env.credentials,
            config,
        })
    }

    /// Bcrypt cost used to equalize unknown-username timing.
    #[must_use]
    pub fn with_password_hash_cost(mut self, cost: u32) -> Self {
        self.verifier = self.verifier.with_hash_cost(cost);
        self
    }

    /// Audit trail shared by every flow.
    #[must_use]
    pub const fn audit_trail(&self) -> &SecurityAuditTrail<S> {
        &self.audit
    }

    /// TOTP manager, for enrollment tooling.
    #[must_use]
    pub const fn mfa(&self) -> &MfaChallengeManager<C> {
        &self.mfa
    }

    // ═══════════════════════════════════════════════════════════════════
    // Login
    // ═══════════════════════════════════════════════════════════════════

    /// Username/password login.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimited`]
    /// - [`AuthError::InvalidCredentials`] / [`AuthError::AccountDisabled`]
    /// - [`AuthError::Timeout`] or store errors
    pub async fn login(&self, ctx: &RequestContext, request: PasswordLogin) -> Result<LoginOutcome> {
        self.gate(ctx, endpoints::LOGIN).await?;

        let credential = match self
            .bounded(
                "verifier.authenticate",
                self.verifier.authenticate(&request.username, &request.password),
            )
            .await
        {
            Ok(credential) => credential,
            Err(e) => {
                let event = match e {
                    AuthError::AccountDisabled => SecurityEvent::LoginFailedAccountDisabled,
                    AuthError::InvalidCredentials => SecurityEvent::LoginFailedBadCredentials,
                    _ => {
                        tracing::error!(error = %e, "Password authentication unavailable");
                        return Err(e);
                    }
                };
                count_login("password", "failure");
                self.audit
                    .record(
                        event,
                        Actor::Anonymous,
                        ctx.client_ip.as_deref(),
                        format!("username={}", request.username),
                    )
                    .await;
                return Err(e);
            }
        };

        self.forgive(ctx, endpoints::LOGIN).await;
        self.complete_login(ctx, &credential, request.remember_me, "password")
            .await
    }

    /// Login with a federated identity token.
    ///
    /// Unknown identities from trusted sign-in methods are registered on
    /// the fly.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimited`]
    /// - [`AuthError::IdentityProviderVerificationFailed`]
    /// - [`AuthError::InvalidCredentials`]: unverified email on an untrusted
    ///   method, or unknown identity that may not self-register
    /// - [`AuthError::AccountDisabled`], [`AuthError::AccountLinkConflict`]
    pub async fn login_federated(
        &self,
        ctx: &RequestContext,
        id_token: &str,
        remember_me: bool,
    ) -> Result<LoginOutcome> {
        self.gate(ctx, endpoints::FEDERATED_LOGIN).await?;
        let identity = self.verify_identity(ctx, id_token).await?;

        let (credential, remember_me) = match self.find_federated(&identity).await? {
            Some(credential) => (credential, remember_me),
            None => {
                if !CredentialVerifier::<R, P>::is_trusted_provider(&identity.sign_in_provider) {
                    count_login("federated", "failure");
                    self.audit
                        .record(
                            SecurityEvent::LoginFailedUserNotFound,
                            Actor::External(identity.external_id.clone()),
                            ctx.client_ip.as_deref(),
                            format!("sign_in_provider={}", identity.sign_in_provider),
                        )
                        .await;
                    return Err(AuthError::InvalidCredentials);
                }
                let created = self
                    .bounded("verifier.auto_register", self.verifier.auto_register(&identity))
                    .await?;
                self.on_registered(ctx, &identity, &created).await?;
                (created, true)
            }
        };

        self.ensure_enabled(ctx, &credential).await?;
        self.forgive(ctx, endpoints::FEDERATED_LOGIN).await;
        self.complete_login(ctx, &credential, remember_me, "federated")
            .await
    }

    /// Explicit registration with a federated identity token.
    ///
    /// Already-mapped identities just get a session. An existing account
    /// with the same email is linked to the identity; otherwise a new
    /// account and tenant are created.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimited`]
    /// - [`AuthError::IdentityProviderVerificationFailed`]
    /// - [`AuthError::AccountLinkConflict`]: the email's account is linked
    ///   to a different identity
    /// - [`AuthError::AccountDisabled`]
    pub async fn register_federated(
        &self,
        ctx: &RequestContext,
        id_token: &str,
        registration: FederatedRegistration,
    ) -> Result<Session> {
        self.gate(ctx, endpoints::FEDERATED_REGISTER).await?;
        let identity = self.verify_identity(ctx, id_token).await?;

        let session = self
            .operations
            .run(
                &REGISTER_FEDERATED,
                ctx,
                &registration,
                self.register_or_link(ctx, &identity, &registration),
            )
            .await?;

        self.forgive(ctx, endpoints::FEDERATED_REGISTER).await;
        Ok(session)
    }

    /// Second step of an MFA login.
    ///
    /// The challenge is consumed before the code is checked, so a wrong
    /// code also spends it.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimited`]
    /// - [`AuthError::TokenExpiredOrUnknown`]: challenge unknown, expired or used
    /// - [`AuthError::MfaInvalidCode`]
    /// - [`AuthError::AccountDisabled`]
    pub async fn verify_totp_and_login(
        &self,
        ctx: &RequestContext,
        mfa_token: &str,
        code: &str,
    ) -> Result<Session> {
        self.gate(ctx, endpoints::MFA_VERIFY).await?;
        let challenge = self
            .bounded("mfa.consume_challenge", self.mfa.consume_challenge(mfa_token))
            .await?
            .ok_or(AuthError::TokenExpiredOrUnknown)?;

        let credential = self
            .bounded(
                "credentials.find_by_id",
                self.credentials
                    .find_by_id(TenantScope::CrossTenant, challenge.user_id),
            )
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        self.ensure_enabled(ctx, &credential).await?;

        if let Err(e) = self.mfa.verify_for(&credential, code) {
            count_login("totp", "failure");
            self.audit
                .record(
                    SecurityEvent::MfaFailed,
                    credential.user_id,
                    ctx.client_ip.as_deref(),
                    "invalid code",
                )
                .await;
            return Err(e);
        }

        self.audit
            .record(
                SecurityEvent::MfaVerified,
                credential.user_id,
                ctx.client_ip.as_deref(),
                "",
            )
            .await;
        self.forgive(ctx, endpoints::MFA_VERIFY).await;
        self.establish_logged_in(ctx, &credential, challenge.remember_me, "totp")
            .await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Refresh / logout / request authentication
    // ═══════════════════════════════════════════════════════════════════

    /// Rotate a refresh token into a new session.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpiredOrUnknown`]
    /// - [`AuthError::ReuseDetected`]: the family and every access session
    ///   of the user are gone; the client must log in again
    /// - [`AuthError::AccountDisabled`]
    pub async fn refresh(&self, ctx: &RequestContext, refresh_token: &str) -> Result<Session> {
        let rotated = match self
            .bounded("refresh.rotate", self.refresh.rotate(refresh_token))
            .await
        {
            Ok(rotated) => rotated,
            Err(AuthError::ReuseDetected { user_id, family_id }) => {
                self.audit
                    .record(
                        SecurityEvent::RefreshTokenReuseDetected,
                        user_id,
                        ctx.client_ip.as_deref(),
                        format!("family_id={family_id}"),
                    )
                    .await;
                self.contain_reuse(user_id, family_id).await;
                return Err(AuthError::ReuseDetected { user_id, family_id });
            }
            Err(e) => return Err(e),
        };

        let credential = self
            .bounded(
                "credentials.find_by_id",
                self.credentials
                    .find_by_id(TenantScope::CrossTenant, rotated.user_id),
            )
            .await?;
        let Some(credential) = credential.filter(Credential::is_enabled) else {
            self.bounded(
                "refresh.invalidate_family",
                self.refresh.invalidate_family(rotated.family_id),
            )
            .await?;
            return Err(AuthError::AccountDisabled);
        };

        let (access_token, access_token_expires_at) = self.open_access_session(ctx, &credential).await?;
        self.audit
            .record(
                SecurityEvent::TokenRefreshed,
                credential.user_id,
                ctx.client_ip.as_deref(),
                format!("family_id={}", rotated.family_id),
            )
            .await;

        Ok(Session {
            user: credential.user_info(),
            access_token,
            access_token_expires_at,
            refresh_token: Some(rotated.token),
        })
    }

    /// End the session: access token, fingerprint and refresh family.
    ///
    /// Idempotent; unknown tokens are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Timeout`] or store errors.
    pub async fn logout(&self, ctx: &RequestContext, refresh_token: Option<&str>) -> Result<()> {
        let mut actor = ctx.principal.map(|p| p.user_id);

        if let Some(access_token) = ctx.access_token.as_deref() {
            if actor.is_none() {
                actor = self
                    .bounded("sessions.get", self.sessions.get(access_token))
                    .await?
                    .map(|s| s.user_id);
            }
            self.bounded("fingerprints.unbind", self.fingerprints.unbind(access_token))
                .await?;
            self.bounded("sessions.delete", self.sessions.delete(access_token))
                .await?;
        }

        let owner = match refresh_token {
            Some(token) => {
                self.bounded(
                    "refresh.remove_token_and_family",
                    self.refresh.remove_token_and_family(token),
                )
                .await?
            }
            None => None,
        };

        self.audit
            .record(
                SecurityEvent::Logout,
                actor.or(owner),
                ctx.client_ip.as_deref(),
                "",
            )
            .await;
        tracing::info!(user_id = ?actor.or(owner), "Logged out");
        Ok(())
    }

    /// Resolve the request's access token to a principal.
    ///
    /// The fingerprint is compared and a mismatch audited, but never
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] for a missing, unknown or
    /// expired access token.
    pub async fn resolve(&self, ctx: &RequestContext) -> Result<Principal> {
        let access_token = ctx
            .access_token
            .as_deref()
            .ok_or(AuthError::Unauthenticated)?;
        let session = self
            .bounded("sessions.get", self.sessions.get(access_token))
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let principal = Principal {
            user_id: session.user_id,
            tenant_id: session.tenant_id,
        };
        let ctx = ctx.clone().with_principal(principal);
        self.bounded("fingerprints.check", self.fingerprints.check(access_token, &ctx))
            .await?;
        Ok(principal)
    }

    // ═══════════════════════════════════════════════════════════════════
    // TOTP management (signed-in user)
    // ═══════════════════════════════════════════════════════════════════

    /// Start TOTP enrollment for the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] without a principal.
    pub async fn totp_setup(&self, ctx: &RequestContext) -> Result<TotpSetup> {
        let credential = self.current_credential(ctx).await?;
        let label = credential.email.as_deref().unwrap_or(&credential.username);
        self.mfa.setup(label)
    }

    /// Turn TOTP on with a secret from [`totp_setup`](Self::totp_setup).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MfaInvalidCode`] if `code` does not match `secret`.
    pub async fn totp_enable(&self, ctx: &RequestContext, secret: &str, code: &str) -> Result<()> {
        let principal = ctx.require_principal()?;

        let sealed = match self.mfa.enable(secret, code) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.record_mfa_failure(ctx, principal.user_id, "enable").await;
                return Err(e);
            }
        };

        self.bounded(
            "credentials.set_mfa",
            self.credentials
                .set_mfa(principal.scope(), principal.user_id, Some(sealed), true),
        )
        .await?;
        self.audit
            .record(
                SecurityEvent::MfaEnabled,
                principal.user_id,
                ctx.client_ip.as_deref(),
                "",
            )
            .await;
        Ok(())
    }

    /// Turn TOTP off after checking a current code.
    ///
    /// Succeeds without doing anything if TOTP is already off.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MfaInvalidCode`] if the code is wrong.
    pub async fn totp_disable(&self, ctx: &RequestContext, code: &str) -> Result<()> {
        let credential = self.current_credential(ctx).await?;

        let changed = match self.mfa.disable(&credential, code) {
            Ok(changed) => changed,
            Err(e) => {
                self.record_mfa_failure(ctx, credential.user_id, "disable").await;
                return Err(e);
            }
        };
        if !changed {
            return Ok(());
        }

        self.bounded(
            "credentials.set_mfa",
            self.credentials.set_mfa(
                TenantScope::Tenant(credential.tenant_id),
                credential.user_id,
                None,
                false,
            ),
        )
        .await?;
        self.audit
            .record(
                SecurityEvent::MfaDisabled,
                credential.user_id,
                ctx.client_ip.as_deref(),
                "",
            )
            .await;
        Ok(())
    }

    /// Whether the signed-in user has TOTP on.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] without a principal.
    pub async fn totp_status(&self, ctx: &RequestContext) -> Result<bool> {
        let credential = self.current_credential(ctx).await?;
        Ok(MfaChallengeManager::<C>::status(&credential))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    async fn bounded<X>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<X>>,
    ) -> Result<X> {
        with_timeout(self.config.store_timeout, operation, fut).await
    }

    /// Rate limit gate. Rejections are audited.
    async fn gate(&self, ctx: &RequestContext, endpoint: &str) -> Result<()> {
        let ip = ctx.ip_or_unknown();
        match self
            .bounded("rate_limiter.check", self.rate_limiter.check(endpoint, ip))
            .await
        {
            Err(e @ AuthError::RateLimited { .. }) => {
                self.audit
                    .record(
                        SecurityEvent::RateLimitExceeded,
                        Actor::Anonymous,
                        ctx.client_ip.as_deref(),
                        format!("endpoint={endpoint}"),
                    )
                    .await;
                Err(e)
            }
            other => other,
        }
    }

    /// Reset the bucket after a success. Failures only cost the client
    /// some budget, so they are logged and dropped.
    async fn forgive(&self, ctx: &RequestContext, endpoint: &str) {
        let reset = self
            .bounded(
                "rate_limiter.reset",
                self.rate_limiter.reset(endpoint, ctx.ip_or_unknown()),
            )
            .await;
        if let Err(e) = reset {
            tracing::warn!(endpoint = endpoint, error = %e, "Failed to reset rate limit bucket");
        }
    }

    async fn verify_identity(&self, ctx: &RequestContext, id_token: &str) -> Result<FederatedIdentity> {
        let identity = match self
            .bounded("identity_provider.verify", self.verifier.verify_federated(id_token))
            .await
        {
            Ok(identity) => identity,
            Err(e) => {
                if e == AuthError::IdentityProviderVerificationFailed {
                    count_login("federated", "failure");
                    self.audit
                        .record(
                            SecurityEvent::LoginFailedInvalidToken,
                            Actor::Anonymous,
                            ctx.client_ip.as_deref(),
                            "",
                        )
                        .await;
                }
                return Err(e);
            }
        };

        if let Err(e) = CredentialVerifier::<R, P>::enforce_trust_policy(&identity) {
            count_login("federated", "failure");
            self.audit
                .record(
                    SecurityEvent::LoginFailedEmailNotVerified,
                    Actor::External(identity.external_id.clone()),
                    ctx.client_ip.as_deref(),
                    format!("sign_in_provider={}", identity.sign_in_provider),
                )
                .await;
            return Err(e);
        }
        Ok(identity)
    }

    async fn find_federated(&self, identity: &FederatedIdentity) -> Result<Option<Credential>> {
        let mapped = self
            .bounded(
                "identities.internal_id",
                self.identities.internal_id(&identity.external_id),
            )
            .await?;
        let Some(user_id) = mapped else {
            return Ok(None);
        };

        let credential = self
            .bounded(
                "credentials.find_by_id",
                self.credentials.find_by_id(TenantScope::CrossTenant, user_id),
            )
            .await?;
        if credential.is_none() {
            // Stale cache entry for a removed link.
            self.bounded(
                "identities.remove_mapping",
                self.identities.remove_mapping(&identity.external_id, user_id),
            )
            .await?;
        }
        Ok(credential)
    }

    async fn register_or_link(
        &self,
        ctx: &RequestContext,
        identity: &FederatedIdentity,
        registration: &FederatedRegistration,
    ) -> Result<Session> {
        if let Some(existing) = self.find_federated(identity).await? {
            self.ensure_enabled(ctx, &existing).await?;
            return self.establish_logged_in(ctx, &existing, true, "federated").await;
        }

        let by_email = match identity.email.as_deref() {
            Some(email) => {
                self.bounded(
                    "credentials.find_by_email",
                    self.credentials.find_by_email(TenantScope::CrossTenant, email),
                )
                .await?
            }
            None => None,
        };

        let credential = if let Some(existing) = by_email {
            if existing
                .external_id
                .as_deref()
                .is_some_and(|linked| linked != identity.external_id)
            {
                tracing::warn!(
                    user_id = %existing.user_id,
                    external_id = %identity.external_id,
                    "Email already owned by an account linked to another identity"
                );
                return Err(AuthError::AccountLinkConflict);
            }
            self.bounded(
                "credentials.link_external_id",
                self.credentials.link_external_id(
                    TenantScope::Tenant(existing.tenant_id),
                    existing.user_id,
                    &identity.external_id,
                ),
            )
            .await?;
            self.bounded(
                "identities.create_mapping",
                self.identities
                    .create_mapping(&identity.external_id, existing.user_id),
            )
            .await?;
            tracing::info!(user_id = %existing.user_id, "Federated identity linked to existing account");
            existing
        } else {
            let created = self
                .bounded(
                    "verifier.register",
                    self.verifier.register(
                        identity,
                        registration.name.clone(),
                        registration.organization_name.clone(),
                    ),
                )
                .await?;
            self.on_registered(ctx, identity, &created).await?;
            created
        };

        self.ensure_enabled(ctx, &credential).await?;
        self.establish_logged_in(ctx, &credential, true, "federated").await
    }

    async fn on_registered(
        &self,
        ctx: &RequestContext,
        identity: &FederatedIdentity,
        credential: &Credential,
    ) -> Result<()> {
        self.bounded(
            "identities.create_mapping",
            self.identities
                .create_mapping(&identity.external_id, credential.user_id),
        )
        .await?;
        self.audit
            .record(
                SecurityEvent::UserRegistered,
                credential.user_id,
                ctx.client_ip.as_deref(),
                format!("sign_in_provider={}", identity.sign_in_provider),
            )
            .await;
        Ok(())
    }

    async fn ensure_enabled(&self, ctx: &RequestContext, credential: &Credential) -> Result<()> {
        if credential.is_enabled() {
            return Ok(());
        }
        count_login("any", "failure");
        self.audit
            .record(
                SecurityEvent::LoginFailedAccountDisabled,
                credential.user_id,
                ctx.client_ip.as_deref(),
                "",
            )
            .await;
        Err(AuthError::AccountDisabled)
    }

    /// After the first factor: challenge if TOTP is on, else a session.
    async fn complete_login(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        remember_me: bool,
        method: &'static str,
    ) -> Result<LoginOutcome> {
        if MfaChallengeManager::<C>::status(credential) {
            let mfa_token = self
                .bounded(
                    "mfa.build_challenge",
                    self.mfa.build_challenge(credential.user_id, remember_me),
                )
                .await?;
            self.audit
                .record(
                    SecurityEvent::MfaChallengeIssued,
                    credential.user_id,
                    ctx.client_ip.as_deref(),
                    format!("method={method}"),
                )
                .await;
            return Ok(LoginOutcome::MfaRequired { mfa_token });
        }

        let session = self
            .establish_logged_in(ctx, credential, remember_me, method)
            .await?;
        Ok(LoginOutcome::Authenticated(session))
    }

    async fn establish_logged_in(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        remember_me: bool,
        method: &'static str,
    ) -> Result<Session> {
        let session = self.establish(ctx, credential, remember_me).await?;
        self.on_login(ctx, credential, method).await;
        Ok(session)
    }

    /// Access token, fingerprint binding and optional refresh family.
    async fn establish(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        remember_me: bool,
    ) -> Result<Session> {
        let (access_token, access_token_expires_at) = self.open_access_session(ctx, credential).await?;

        let refresh_token = if remember_me {
            let issued = self
                .bounded("refresh.issue", self.refresh.issue(credential.user_id))
                .await?;
            Some(issued.token)
        } else {
            None
        };

        Ok(Session {
            user: credential.user_info(),
            access_token,
            access_token_expires_at,
            refresh_token,
        })
    }

    async fn open_access_session(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
    ) -> Result<(String, chrono::DateTime<Utc>)> {
        let ttl = self.config.tokens.access_token_ttl;
        let session = AccessSession {
            access_token: generate_token(),
            user_id: credential.user_id,
            tenant_id: credential.tenant_id,
            created_at: Utc::now(),
            expires_at: expires_after(ttl),
        };

        self.bounded("sessions.create", self.sessions.create(&session, ttl))
            .await?;
        self.bounded(
            "fingerprints.bind",
            self.fingerprints.bind(&session.access_token, ctx),
        )
        .await?;
        Ok((session.access_token, session.expires_at))
    }

    async fn on_login(&self, ctx: &RequestContext, credential: &Credential, method: &'static str) {
        count_login(method, "success");
        let touched = self
            .bounded(
                "credentials.record_login",
                self.credentials.record_login(credential.user_id, Utc::now()),
            )
            .await;
        if let Err(e) = touched {
            tracing::warn!(user_id = %credential.user_id, error = %e, "Failed to record last login");
        }

        tracing::info!(user_id = %credential.user_id, method = method, "Login succeeded");
        self.audit
            .record(
                SecurityEvent::LoginSuccess,
                credential.user_id,
                ctx.client_ip.as_deref(),
                format!("method={method}"),
            )
            .await;
    }

    /// Forced global logout after reuse: the family again (idempotent, it
    /// may have failed inside the authority) and every access session.
    /// Failures are logged; the caller is already being told to
    /// re-authenticate.
    async fn contain_reuse(&self, user_id: UserId, family_id: FamilyId) {
        let invalidated = self
            .bounded(
                "refresh.invalidate_family",
                self.refresh.invalidate_family(family_id),
            )
            .await;
        if let Err(e) = invalidated {
            tracing::error!(family_id = %family_id, error = %e, "Family still live after reuse");
        }
        self.revoke_all_sessions(user_id).await;
    }

    async fn revoke_all_sessions(&self, user_id: UserId) {
        match self
            .bounded(
                "sessions.delete_user_sessions",
                self.sessions.delete_user_sessions(user_id),
            )
            .await
        {
            Ok(revoked) => {
                tracing::warn!(user_id = %user_id, revoked = revoked, "All sessions revoked");
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to revoke sessions after reuse");
            }
        }
    }

    async fn current_credential(&self, ctx: &RequestContext) -> Result<Credential> {
        let principal = ctx.require_principal()?;
        self.bounded(
            "credentials.find_by_id",
            self.credentials.find_by_id(principal.scope(), principal.user_id),
        )
        .await?
        .ok_or(AuthError::Unauthenticated)
    }

    async fn record_mfa_failure(&self, ctx: &RequestContext, user_id: UserId, action: &str) {
        self.audit
            .record(
                SecurityEvent::MfaFailed,
                user_id,
                ctx.client_ip.as_deref(),
                format!("action={action}"),
            )
            .await;
    }
}

impl<R, P, M, T, C, F, A, L, S> SessionEstablisher<R, P, M, T, C, F, A, L, S>
where
    R: CredentialRepository + Clone,
    P: IdentityProvider + Clone,
    M: IdentityMappingCache + Clone,
    T: RefreshTokenStore + Clone,
    C: MfaChallengeStore + Clone,
    F: FingerprintStore + Clone,
    A: AccessSessionStore + Clone,
    L: AttemptCounter + Clone,
    S: AuditSink + AuditQueryStore,
{
    /// Search the audit log. The query itself is audited.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Timeout`] or store errors.
    pub async fn query_audit(&self, ctx: &RequestContext, query: AuditQuery) -> Result<Page<AuditEntry>> {
        self.operations
            .run(
                &QUERY_AUDIT_LOG,
                ctx,
                &query,
                self.bounded("audit.query", self.audit_store.query(&query)),
            )
            .await
    }
}

impl<R, P, M, T, C, F, A, L, S> std::fmt::Debug for SessionEstablisher<R, P, M, T, C, F, A, L, S>
where
    R: CredentialRepository + Clone,
    P: IdentityProvider + Clone,
    M: IdentityMappingCache + Clone,
    T: RefreshTokenStore + Clone,
    C: MfaChallengeStore + Clone,
    F: FingerprintStore + Clone,
    A: AccessSessionStore + Clone,
    L: AttemptCounter + Clone,
    S: AuditSink,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEstablisher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn count_login(method: &'static str, outcome: &'static str) {
    metrics::counter!("auth_login_total", "method" => method, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::MockEnvironment;
    use crate::mocks::MockAuditSink;
    use crate::state::AccountStatus;
    use std::time::Duration;

    type Establisher = SessionEstablisher<
        crate::mocks::MockCredentialRepository,
        crate::mocks::MockIdentityProvider,
        crate::mocks::MockIdentityCache,
        crate::mocks::MockRefreshTokenStore,
        crate::mocks::MockChallengeStore,
        crate::mocks::MockFingerprintStore,
        crate::mocks::MockAccessSessionStore,
        crate::mocks::MockAttemptCounter,
        MockAuditSink,
    >;

    fn establisher(env: &MockEnvironment) -> Establisher {
        let cipher = SecretCipher::new(&[1u8; 32]).unwrap_or_else(|e| panic!("{e}"));
        SessionEstablisher::new(env.clone(), SecurityConfig::default(), cipher)
            .unwrap_or_else(|e| panic!("{e}"))
            .with_password_hash_cost(4)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("10.0.0.1", "Mozilla/5.0")
    }

    #[tokio::test]
    async fn test_login_without_remember_me_has_no_refresh_token() {
        let env = MockEnvironment::mock();
        env.credentials
            .add_password_user("alice", "alice@example.com", "pw")
            .unwrap_or_else(|e| panic!("{e}"));
        let establisher = establisher(&env);

        let outcome = establisher
            .login(&ctx(), PasswordLogin::new("alice", "pw", false))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let session = outcome.session().cloned().unwrap_or_else(|| panic!("no session"));

        assert!(session.refresh_token.is_none());
        assert!(env.fingerprints.is_bound(&session.access_token));
        assert_eq!(env.sessions.count_for(session.user.id), 1);
    }

    #[tokio::test]
    async fn test_disabled_account_is_rejected_and_audited() {
        let env = MockEnvironment::mock();
        let alice = env
            .credentials
            .add_password_user("alice", "alice@example.com", "pw")
            .unwrap_or_else(|e| panic!("{e}"));
        env.credentials.set_status(alice.user_id, AccountStatus::Disabled);
        let establisher = establisher(&env);

        let result = establisher
            .login(&ctx(), PasswordLogin::new("alice", "pw", true))
            .await;
        assert_eq!(result, Err(AuthError::AccountDisabled));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(env.audit_sink.entries_for("LOGIN_FAILED_ACCOUNT_DISABLED").len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_requires_live_access_token() {
        let env = MockEnvironment::mock();
        env.credentials
            .add_password_user("alice", "alice@example.com", "pw")
            .unwrap_or_else(|e| panic!("{e}"));
        let establisher = establisher(&env);

        assert_eq!(establisher.resolve(&ctx()).await, Err(AuthError::Unauthenticated));

        let session = establisher
            .login(&ctx(), PasswordLogin::new("alice", "pw", false))
            .await
            .ok()
            .and_then(|o| o.session().cloned())
            .unwrap_or_else(|| panic!("login failed"));

        let principal = establisher
            .resolve(&ctx().with_access_token(&session.access_token))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(principal.user_id, session.user.id);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let env = MockEnvironment::mock();
        let cipher = SecretCipher::new(&[1u8; 32]).unwrap_or_else(|e| panic!("{e}"));
        let config = SecurityConfig::default()
            .with_rate_limit(crate::config::RateLimitConfig::new(0, Duration::from_secs(1)));
        assert!(matches!(
            SessionEstablisher::new(env, config, cipher),
            Err(AuthError::ConfigError(_))
        ));
    }
}
