//! TOTP second factor.
//!
//! Handles secret generation and enrollment data (QR code, `otpauth://`
//! URI), the short-lived challenge that bridges a verified password and
//! the code prompt, and RFC 6238 code checks.
//!
//! # Parameters
//!
//! - SHA-1, 6 digits, 30 second period
//! - One step of skew in each direction (previous, current, next)
//! - Secrets are base32 and sealed with [`SecretCipher`] before storage

use crate::config::MfaConfig;
use crate::crypto::SecretCipher;
use crate::error::{AuthError, Result};
use crate::providers::{MfaChallenge, MfaChallengeStore};
use crate::state::{Credential, TotpSetup, UserId};
use crate::utils::generate_token;
use chrono::Utc;
use rand::RngCore;
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Label used when the account name is irrelevant (code checks).
const CHECK_LABEL: &str = "account";

/// Issues challenges and verifies TOTP codes.
#[derive(Debug, Clone)]
pub struct MfaChallengeManager<C: MfaChallengeStore> {
    challenges: C,
    config: MfaConfig,
    cipher: SecretCipher,
}

impl<C: MfaChallengeStore> MfaChallengeManager<C> {
    /// Create a manager.
    #[must_use]
    pub const fn new(challenges: C, config: MfaConfig, cipher: SecretCipher) -> Self {
        Self {
            challenges,
            config,
            cipher,
        }
    }

    /// Fresh random secret of the configured length, base32 encoded.
    #[must_use]
    pub fn generate_secret(&self) -> String {
        let mut bytes = vec![0u8; self.config.secret_length];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Secret::Raw(bytes).to_encoded().to_string()
    }

    /// Enrollment data for `email`: a new secret, its QR code and URI.
    ///
    /// Nothing is persisted; the secret only becomes active through
    /// [`enable`](Self::enable).
    ///
    /// # Errors
    ///
    /// Returns error if the TOTP parameters or QR rendering are rejected.
    pub fn setup(&self, email: &str) -> Result<TotpSetup> {
        let secret = self.generate_secret();
        let totp = self.totp(&secret, email)?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| AuthError::InternalError(format!("QR generation failed: {e}")))?;

        Ok(TotpSetup {
            totp_uri: totp.get_url(),
            qr_code_data_uri: format!("data:image/png;base64,{qr}"),
            secret,
        })
    }

    /// Store a single-use challenge and return its id.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn build_challenge(&self, user_id: UserId, remember_me: bool) -> Result<String> {
        let challenge_id = generate_token();
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.challenge_ttl)
            .map_err(|e| AuthError::ConfigError(format!("challenge TTL out of range: {e}")))?;

        let challenge = MfaChallenge {
            user_id,
            remember_me,
            created_at,
            expires_at: created_at + ttl,
        };
        self.challenges
            .store(&challenge_id, challenge, self.config.challenge_ttl)
            .await?;

        tracing::debug!(user_id = %user_id, "MFA challenge issued");
        Ok(challenge_id)
    }

    /// Take a challenge. A second call with the same id returns `None`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn consume_challenge(&self, challenge_id: &str) -> Result<Option<MfaChallenge>> {
        let challenge = self.challenges.consume(challenge_id).await?;
        Ok(challenge.filter(|c| !c.is_expired()))
    }

    /// Check `code` against a base32 `secret`, allowing one step of drift.
    ///
    /// Malformed secrets and codes are rejected, never reported as errors.
    #[must_use]
    pub fn verify_code(&self, secret: &str, code: &str) -> bool {
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        self.totp(secret, CHECK_LABEL)
            .and_then(|totp| {
                totp.check_current(code)
                    .map_err(|e| AuthError::InternalError(e.to_string()))
            })
            .unwrap_or(false)
    }

    /// Verify the first code for `secret` and return the sealed secret to
    /// persist on the account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MfaInvalidCode`] if the code is wrong.
    pub fn enable(&self, secret: &str, code: &str) -> Result<String> {
        if !self.verify_code(secret, code) {
            return Err(AuthError::MfaInvalidCode);
        }
        self.cipher.seal(secret)
    }

    /// Verify a code against the account's stored secret before removal.
    ///
    /// Returns `false` if TOTP was not enabled (nothing to do).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MfaInvalidCode`] if the code is wrong.
    pub fn disable(&self, credential: &Credential, code: &str) -> Result<bool> {
        if !Self::status(credential) {
            return Ok(false);
        }
        self.verify_for(credential, code)?;
        Ok(true)
    }

    /// Verify a code against the account's sealed secret.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MfaInvalidCode`] if the code is wrong or the
    /// account has no secret.
    pub fn verify_for(&self, credential: &Credential, code: &str) -> Result<()> {
        let Some(sealed) = credential.mfa_secret.as_deref() else {
            return Err(AuthError::MfaInvalidCode);
        };
        let secret = self.cipher.open(sealed)?;
        if self.verify_code(&secret, code) {
            Ok(())
        } else {
            Err(AuthError::MfaInvalidCode)
        }
    }

    /// Whether the account has TOTP turned on.
    #[must_use]
    pub fn status(credential: &Credential) -> bool {
        credential.mfa_enabled && credential.mfa_secret.is_some()
    }

    /// Code for the current time step. Test helper.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is malformed.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn current_code(&self, secret: &str) -> Result<String> {
        self.totp(secret, CHECK_LABEL)?
            .generate_current()
            .map_err(|e| AuthError::InternalError(e.to_string()))
    }

    fn totp(&self, secret: &str, account: &str) -> Result<TOTP> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::InternalError(format!("malformed TOTP secret: {e:?}")))?;

        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            bytes,
            Some(self.config.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::InternalError(format!("TOTP init failed: {e}")))
    }
}
