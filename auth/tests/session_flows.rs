//! End-to-end session flows over the in-memory providers.
//!
//! - Password login with and without "remember me"
//! - Refresh token rotation and reuse detection
//! - TOTP enrollment and the two-step MFA login
//! - Logout and access token resolution

use chronoflow_auth::environment::MockEnvironment;
use chronoflow_auth::mocks::{
    MockAccessSessionStore, MockAttemptCounter, MockAuditSink, MockChallengeStore,
    MockCredentialRepository, MockFingerprintStore, MockIdentityCache, MockIdentityProvider,
    MockRefreshTokenStore,
};
use chronoflow_auth::{
    AuthError, LoginOutcome, PasswordLogin, RequestContext, SecretCipher, SecurityConfig, Session,
    SessionEstablisher,
};
use std::sync::Arc;
use std::time::Duration;

type Establisher = SessionEstablisher<
    MockCredentialRepository,
    MockIdentityProvider,
    MockIdentityCache,
    MockRefreshTokenStore,
    MockChallengeStore,
    MockFingerprintStore,
    MockAccessSessionStore,
    MockAttemptCounter,
    MockAuditSink,
>;

fn establisher(env: &MockEnvironment) -> Establisher {
    let cipher = SecretCipher::new(&[7u8; 32]).unwrap_or_else(|e| panic!("{e}"));
    SessionEstablisher::new(env.clone(), SecurityConfig::default(), cipher)
        .unwrap_or_else(|e| panic!("{e}"))
        .with_password_hash_cost(4)
}

fn browser() -> RequestContext {
    RequestContext::new("198.51.100.20", "Mozilla/5.0 (X11; Linux x86_64)")
}

fn add_alice(env: &MockEnvironment) {
    env.credentials
        .add_password_user("alice", "alice@example.com", "correct horse")
        .unwrap_or_else(|e| panic!("{e}"));
}

async fn login(establisher: &Establisher, remember_me: bool) -> Session {
    let outcome = establisher
        .login(&browser(), PasswordLogin::new("alice", "correct horse", remember_me))
        .await
        .unwrap_or_else(|e| panic!("login failed: {e}"));
    match outcome {
        LoginOutcome::Authenticated(session) => session,
        LoginOutcome::MfaRequired { .. } => panic!("unexpected MFA challenge"),
    }
}

async fn signed_in(establisher: &Establisher, session: &Session) -> RequestContext {
    let ctx = browser().with_access_token(&session.access_token);
    let principal = establisher
        .resolve(&ctx)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    ctx.with_principal(principal)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Settle the asynchronous audit writers.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_remember_me_login_issues_refresh_token() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let session = login(&establisher, true).await;

    assert!(session.refresh_token.is_some());
    assert_eq!(session.user.username, "alice");
    assert!(session.access_token_expires_at > chrono::Utc::now());
    assert!(env.fingerprints.is_bound(&session.access_token));

    settle().await;
    assert_eq!(env.audit_sink.entries_for("LOGIN_SUCCESS").len(), 1);
}

#[tokio::test]
async fn test_wrong_password_is_audited() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let result = establisher
        .login(&browser(), PasswordLogin::new("alice", "battery staple", false))
        .await;
    assert_eq!(result, Err(AuthError::InvalidCredentials));

    let unknown = establisher
        .login(&browser(), PasswordLogin::new("mallory", "battery staple", false))
        .await;
    assert_eq!(unknown, Err(AuthError::InvalidCredentials));

    settle().await;
    assert_eq!(env.audit_sink.entries_for("LOGIN_FAILED_BAD_CREDENTIALS").len(), 2);
}

#[tokio::test]
async fn test_eleventh_attempt_is_rate_limited_until_reset() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    for _ in 0..10 {
        let result = establisher
            .login(&browser(), PasswordLogin::new("alice", "wrong", false))
            .await;
        assert_eq!(result, Err(AuthError::InvalidCredentials));
    }

    let blocked = establisher
        .login(&browser(), PasswordLogin::new("alice", "correct horse", false))
        .await;
    assert!(matches!(blocked, Err(AuthError::RateLimited { .. })));

    // Another client is unaffected.
    let elsewhere = RequestContext::new("198.51.100.99", "Mozilla/5.0");
    let outcome = establisher
        .login(&elsewhere, PasswordLogin::new("alice", "correct horse", false))
        .await;
    assert!(outcome.is_ok());

    settle().await;
    assert_eq!(env.audit_sink.entries_for("RATE_LIMIT_EXCEEDED").len(), 1);
}

#[tokio::test]
async fn test_successful_login_resets_the_bucket() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    for _ in 0..9 {
        let _ = establisher
            .login(&browser(), PasswordLogin::new("alice", "wrong", false))
            .await;
    }
    login(&establisher, false).await;

    for _ in 0..10 {
        let result = establisher
            .login(&browser(), PasswordLogin::new("alice", "wrong", false))
            .await;
        assert_eq!(result, Err(AuthError::InvalidCredentials));
    }
}

#[tokio::test]
async fn test_refresh_rotates_and_replay_revokes_everything() {
    init_tracing();
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let first = login(&establisher, true).await;
    let r1 = first.refresh_token.clone().unwrap_or_default();

    let second = establisher
        .refresh(&browser(), &r1)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let r2 = second.refresh_token.clone().unwrap_or_default();
    assert_ne!(r1, r2);
    assert_ne!(first.access_token, second.access_token);
    assert_eq!(env.sessions.count_for(first.user.id), 2);

    // Stolen R1 is replayed.
    let replay = establisher.refresh(&browser(), &r1).await;
    assert!(matches!(replay, Err(AuthError::ReuseDetected { .. })));

    // The legitimate holder's R2 died with the family.
    assert_eq!(
        establisher.refresh(&browser(), &r2).await,
        Err(AuthError::TokenExpiredOrUnknown)
    );
    assert_eq!(env.sessions.count_for(first.user.id), 0);
    assert_eq!(
        establisher
            .resolve(&browser().with_access_token(&second.access_token))
            .await,
        Err(AuthError::Unauthenticated)
    );

    // Critical events are durable before the call returns.
    assert_eq!(env.audit_sink.entries_for("REFRESH_TOKEN_REUSE_DETECTED").len(), 1);
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = Arc::new(establisher(&env));

    let root = login(&establisher, true).await.refresh_token.unwrap_or_default();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let establisher = Arc::clone(&establisher);
            let root = root.clone();
            tokio::spawn(async move { establisher.refresh(&browser(), &root).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap_or_else(|e| panic!("{e}")) {
            Ok(_) => winners += 1,
            Err(AuthError::ReuseDetected { .. } | AuthError::TokenExpiredOrUnknown) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_refresh_for_disabled_account_fails() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let session = login(&establisher, true).await;
    env.credentials
        .set_status(session.user.id, chronoflow_auth::state::AccountStatus::Disabled);

    let refresh_token = session.refresh_token.unwrap_or_default();
    assert_eq!(
        establisher.refresh(&browser(), &refresh_token).await,
        Err(AuthError::AccountDisabled)
    );
}

#[tokio::test]
async fn test_totp_enrollment_and_mfa_login() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let session = login(&establisher, false).await;
    let ctx = signed_in(&establisher, &session).await;

    let setup = establisher
        .totp_setup(&ctx)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(setup.totp_uri.starts_with("otpauth://totp/"));
    assert!(setup.qr_code_data_uri.starts_with("data:image/png;base64,"));
    assert_eq!(establisher.totp_status(&ctx).await, Ok(false));

    let code = establisher
        .mfa()
        .current_code(&setup.secret)
        .unwrap_or_else(|e| panic!("{e}"));
    establisher
        .totp_enable(&ctx, &setup.secret, &code)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(establisher.totp_status(&ctx).await, Ok(true));

    let stored = env.credentials.get(session.user.id).unwrap_or_else(|| panic!("missing"));
    assert_ne!(stored.mfa_secret.as_deref(), Some(setup.secret.as_str()), "sealed at rest");

    // Password step now yields a challenge.
    let outcome = establisher
        .login(&browser(), PasswordLogin::new("alice", "correct horse", true))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let LoginOutcome::MfaRequired { mfa_token } = outcome else {
        panic!("expected MFA challenge");
    };

    let session = establisher
        .verify_totp_and_login(&browser(), &mfa_token, &code)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(session.refresh_token.is_some(), "remember_me carried through the challenge");

    // Single use.
    assert_eq!(
        establisher
            .verify_totp_and_login(&browser(), &mfa_token, &code)
            .await,
        Err(AuthError::TokenExpiredOrUnknown)
    );

    settle().await;
    assert_eq!(env.audit_sink.entries_for("MFA_ENABLED").len(), 1);
    assert_eq!(env.audit_sink.entries_for("MFA_CHALLENGE_ISSUED").len(), 1);
    assert_eq!(env.audit_sink.entries_for("MFA_VERIFIED").len(), 1);
}

#[tokio::test]
async fn test_wrong_code_burns_the_challenge() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let session = login(&establisher, false).await;
    let ctx = signed_in(&establisher, &session).await;
    let setup = establisher.totp_setup(&ctx).await.unwrap_or_else(|e| panic!("{e}"));
    let code = establisher
        .mfa()
        .current_code(&setup.secret)
        .unwrap_or_else(|e| panic!("{e}"));
    establisher
        .totp_enable(&ctx, &setup.secret, &code)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let outcome = establisher
        .login(&browser(), PasswordLogin::new("alice", "correct horse", false))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let LoginOutcome::MfaRequired { mfa_token } = outcome else {
        panic!("expected MFA challenge");
    };

    assert_eq!(
        establisher
            .verify_totp_and_login(&browser(), &mfa_token, "12345x")
            .await,
        Err(AuthError::MfaInvalidCode)
    );
    assert_eq!(
        establisher
            .verify_totp_and_login(&browser(), &mfa_token, &code)
            .await,
        Err(AuthError::TokenExpiredOrUnknown)
    );

    settle().await;
    assert_eq!(env.audit_sink.entries_for("MFA_FAILED").len(), 1);
}

#[tokio::test]
async fn test_totp_disable_requires_current_code() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let session = login(&establisher, false).await;
    let ctx = signed_in(&establisher, &session).await;

    // Disabling while already off is a no-op.
    assert_eq!(establisher.totp_disable(&ctx, "123456").await, Ok(()));

    let setup = establisher.totp_setup(&ctx).await.unwrap_or_else(|e| panic!("{e}"));
    let code = establisher
        .mfa()
        .current_code(&setup.secret)
        .unwrap_or_else(|e| panic!("{e}"));
    establisher
        .totp_enable(&ctx, &setup.secret, &code)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(
        establisher.totp_disable(&ctx, "abcdef").await,
        Err(AuthError::MfaInvalidCode)
    );
    assert_eq!(establisher.totp_status(&ctx).await, Ok(true));

    assert_eq!(establisher.totp_disable(&ctx, &code).await, Ok(()));
    assert_eq!(establisher.totp_status(&ctx).await, Ok(false));
}

#[tokio::test]
async fn test_totp_management_requires_principal() {
    let env = MockEnvironment::mock();
    let establisher = establisher(&env);

    assert_eq!(
        establisher.totp_setup(&browser()).await.map(|_| ()),
        Err(AuthError::Unauthenticated)
    );
    assert_eq!(establisher.totp_status(&browser()).await, Err(AuthError::Unauthenticated));
}

#[tokio::test]
async fn test_logout_ends_access_and_refresh() {
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let session = login(&establisher, true).await;
    let ctx = browser().with_access_token(&session.access_token);
    let refresh_token = session.refresh_token.clone().unwrap_or_default();

    establisher
        .logout(&ctx, Some(&refresh_token))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(establisher.resolve(&ctx).await, Err(AuthError::Unauthenticated));
    assert!(!env.fingerprints.is_bound(&session.access_token));
    assert_eq!(
        establisher.refresh(&browser(), &refresh_token).await,
        Err(AuthError::TokenExpiredOrUnknown)
    );

    // Idempotent.
    assert_eq!(establisher.logout(&ctx, Some(&refresh_token)).await, Ok(()));

    settle().await;
    let logouts = env.audit_sink.entries_for("LOGOUT");
    assert_eq!(logouts.len(), 2);
    assert!(logouts.iter().any(|e| e.actor_id == Some(session.user.id)));
}

#[tokio::test]
async fn test_fingerprint_mismatch_is_audited_not_rejected() {
    init_tracing();
    let env = MockEnvironment::mock();
    add_alice(&env);
    let establisher = establisher(&env);

    let session = login(&establisher, false).await;
    let elsewhere = RequestContext::new("203.0.113.66", "curl/8.4.0")
        .with_access_token(&session.access_token);

    let principal = establisher
        .resolve(&elsewhere)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(principal.user_id, session.user.id);

    let mismatches = env.audit_sink.entries_for("TOKEN_FINGERPRINT_MISMATCH");
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches.first().and_then(|e| e.actor_id), Some(session.user.id));
}
