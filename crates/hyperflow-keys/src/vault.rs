//! XChaCha20-Poly1305 sealing of provider secrets.
//!
//! # Wire Format
//!
//! The ciphertext format is: `nonce (24 bytes) || ciphertext || tag (16 bytes)`

use std::fmt;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use hyperflow_core::error::{HyperflowError, Result};

/// Size of the vault key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Minimum size of valid ciphertext (nonce + tag, no plaintext).
pub const MIN_CIPHERTEXT_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypts and decrypts provider secrets at rest.
///
/// Built once at startup from the configured secret and shared by reference;
/// there is no way to re-key a live vault.
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; KEY_SIZE],
}

impl CredentialVault {
    /// Build the vault from a URL-safe base64 secret (padded or not).
    ///
    /// # Errors
    ///
    /// [`HyperflowError::InvalidVaultSecret`] if the secret is not base64 or
    /// does not decode to exactly 32 bytes.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let trimmed = secret.trim();
        if trimmed.is_empty() || trimmed.starts_with("${") {
            return Err(HyperflowError::InvalidVaultSecret(
                "secret is empty or an unexpanded environment reference".into(),
            ));
        }

        let decoded = URL_SAFE
            .decode(trimmed)
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
            .map_err(|e| {
                HyperflowError::InvalidVaultSecret(format!("must be URL-safe base64: {}", e))
            })?;

        let key: [u8; KEY_SIZE] = decoded.as_slice().try_into().map_err(|_| {
            HyperflowError::InvalidVaultSecret(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                decoded.len()
            ))
        })?;

        Ok(Self { key })
    }

    /// A fresh random secret suitable for [`CredentialVault::from_secret`].
    pub fn generate_secret() -> String {
        let key = XChaCha20Poly1305::generate_key(&mut OsRng);
        URL_SAFE.encode(key)
    }

    /// Seal a plaintext secret. Each call uses a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| HyperflowError::InvalidVaultSecret("encryption failed".into()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Open a sealed secret.
    ///
    /// Returns `None` for truncated, tampered, or foreign-key ciphertext;
    /// callers treat that as a corrupted credential.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Option<String> {
        if ciphertext.len() < MIN_CIPHERTEXT_SIZE {
            return None;
        }

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);

        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce_bytes), encrypted)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
