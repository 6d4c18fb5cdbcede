//! Encryption of MFA secrets at rest.
//!
//! Secrets are sealed with AES-256-GCM and stored as base64 of
//! `[nonce (12 bytes)][ciphertext + tag]`. A fresh nonce is drawn for
//! every encryption.

use crate::error::{AuthError, Result};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::sync::Arc;

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for TOTP secrets.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Arc<Aes256Gcm>,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Create a cipher from a 32-byte key.
    ///
    /// The key must come from a secret manager, never from source control.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] if the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(AuthError::ConfigError(
                "Encryption key must be exactly 32 bytes (256 bits) for AES-256-GCM".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| {
            AuthError::ConfigError(format!("Failed to initialize AES-256-GCM cipher: {e}"))
        })?;

        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Encrypt a plaintext secret.
    ///
    /// # Errors
    ///
    /// Returns error if encryption fails.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::InternalError(format!("Encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns error if the value is malformed or fails authentication.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| AuthError::InternalError(format!("Invalid sealed secret: {e}")))?;

        if bytes.len() <= NONCE_LEN {
            return Err(AuthError::InternalError("Sealed secret too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AuthError::InternalError(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| AuthError::InternalError(format!("Decrypted secret is not UTF-8: {e}")))
    }
}
