// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant credential encryption.
//!
//! Bot tokens are stored encrypted in the registry and decrypted only at
//! spawn time. The plaintext lives in a [`Secret`] (zeroized on drop,
//! redacted in `Debug`) until it is placed in the child's environment.
//!
//! Envelope format: `v1:<base64 nonce>:<base64 ciphertext>` (AES-256-GCM,
//! 96-bit random nonce, standard base64 with padding).

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use zeroize::Zeroizing;

const ENVELOPE_VERSION: &str = "v1";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Errors from credential encryption and decryption.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The configured key is not 32 bytes of base64.
    #[error("invalid encryption key")]
    InvalidKey,

    /// The stored value is not a well-formed envelope.
    #[error("malformed credential envelope: {0}")]
    Malformed(&'static str),

    /// The envelope was written by an unknown format version.
    #[error("unsupported credential envelope version: {0}")]
    UnsupportedVersion(String),

    /// Authentication failed (wrong key or tampered ciphertext).
    #[error("credential decryption failed")]
    Decrypt,

    /// Encryption failed.
    #[error("credential encryption failed")]
    Encrypt,

    /// Decrypted bytes are not UTF-8.
    #[error("decrypted credential is not valid UTF-8")]
    InvalidUtf8,
}

/// A decrypted credential.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap a plaintext value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the plaintext. Never log the result.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Decrypts tenant credentials.
#[async_trait]
pub trait CredentialCipher: Send + Sync {
    /// Decrypt a stored envelope.
    async fn decrypt(&self, envelope: &str) -> Result<Secret, CipherError>;
}

/// AES-256-GCM credential cipher.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64_key(key: &str) -> Result<Self, CipherError> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(key.trim())
                .map_err(|_| CipherError::InvalidKey)?,
        );
        Self::from_key_bytes(&bytes)
    }

    /// Build from raw key bytes.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext credential into an envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;
        Ok(format!(
            "{ENVELOPE_VERSION}:{}:{}",
            STANDARD.encode(nonce),
            STANDARD.encode(ciphertext)
        ))
    }

    fn open(&self, envelope: &str) -> Result<Secret, CipherError> {
        let mut parts = envelope.trim().splitn(3, ':');
        let version = parts.next().unwrap_or_default();
        let (Some(nonce_b64), Some(ciphertext_b64)) = (parts.next(), parts.next()) else {
            return Err(CipherError::Malformed("expected three ':'-separated fields"));
        };
        if version != ENVELOPE_VERSION {
            return Err(CipherError::UnsupportedVersion(version.to_string()));
        }

        let nonce_raw = STANDARD
            .decode(nonce_b64)
            .map_err(|_| CipherError::Malformed("nonce is not base64"))?;
        if nonce_raw.len() != NONCE_LEN {
            return Err(CipherError::Malformed("nonce length"));
        }
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|_| CipherError::Malformed("ciphertext is not base64"))?;

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
                .map_err(|_| CipherError::Decrypt)?,
        );
        let text = std::str::from_utf8(&plaintext).map_err(|_| CipherError::InvalidUtf8)?;
        Ok(Secret::new(text))
    }
}

#[async_trait]
impl CredentialCipher for AesGcmCipher {
    async fn decrypt(&self, envelope: &str) -> Result<Secret, CipherError> {
        self.open(envelope)
    }
}
