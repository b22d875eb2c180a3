//! Encryption of per-user upstream API keys.
//!
//! Keys are stored as an opaque base64 blob: a random 12-byte nonce followed
//! by the AES-256-GCM ciphertext and tag. A fresh nonce is drawn for every
//! encryption, so encrypting the same key twice yields different blobs.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use thiserror::Error;

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Errors from credential encryption and decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The master key is not valid base64.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// The master key decodes to the wrong number of bytes.
    #[error("encryption key must be 32 bytes, got {0}")]
    KeyLength(usize),

    /// Encryption failed.
    #[error("encryption failed")]
    Encryption,

    /// The blob is truncated, tampered with, or encrypted under another key.
    #[error("decryption failed")]
    Decryption,
}

/// AES-256-GCM secret box for upstream API keys.
pub struct ApiKeyCipher {
    cipher: Aes256Gcm,
}

impl ApiKeyCipher {
    /// Create a cipher from a base64-encoded 256-bit master key.
    ///
    /// # Errors
    /// Returns an error if the key is not valid base64 or not 32 bytes.
    pub fn new(key_base64: &str) -> Result<Self, CryptoError> {
        let key_bytes = STANDARD
            .decode(key_base64.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        if key_bytes.len() != 32 {
            return Err(CryptoError::KeyLength(key_bytes.len()));
        }

        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Create a cipher from the `MURMUR_ENCRYPTION_KEY` environment
    /// variable.
    ///
    /// # Errors
    /// Returns an error if the variable is unset or holds an invalid key.
    pub fn from_env() -> Result<Self, CryptoError> {
        let key = std::env::var("MURMUR_ENCRYPTION_KEY")
            .map_err(|_| CryptoError::InvalidKey("MURMUR_ENCRYPTION_KEY is not set".to_string()))?;
        Self::new(&key)
    }

    /// Encrypt an API key into a base64 blob suitable for a TEXT column.
    ///
    /// # Errors
    /// Returns an error if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// A tampered or truncated blob fails authentication; wrong plaintext is
    /// never returned silently.
    ///
    /// # Errors
    /// Returns [`CryptoError::Decryption`] if the blob cannot be authenticated.
    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let bytes = STANDARD
            .decode(blob.trim())
            .map_err(|_| CryptoError::Decryption)?;

        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption);
        }

        let nonce = Nonce::from_slice(&bytes[..NONCE_LEN]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &bytes[NONCE_LEN..])
            .map_err(|_| CryptoError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
    }
}

/// Generate a random base64-encoded 256-bit master key.
///
/// Intended for operators provisioning `MURMUR_ENCRYPTION_KEY`.
#[must_use]
pub fn generate_key() -> String {
    let key_bytes: [u8; 32] = rand::thread_rng().gen();
    STANDARD.encode(key_bytes)
}
