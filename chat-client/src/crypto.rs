//! Cryptographic primitives for SecureChat.
//!
//! This module provides:
//! - Argon2id key derivation with a passphrase-derived salt
//! - XChaCha20-Poly1305 encryption with 192-bit nonces
//! - BLAKE3 content addressing for encrypted blobs
//! - Tripcodes for self-certifying display names
//!
//! # Security Notes
//!
//! - The salt is SHA-256(passphrase ‖ constant), so two clients typing the
//!   same passphrase derive the same key without exchanging anything. It
//!   also means identical passphrases always give identical keys.
//! - XChaCha20 uses 192-bit nonces (24 bytes), safe for random generation
//! - Ciphertext layout is `nonce ‖ ciphertext ‖ tag`

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

const KDF_SALT_CONSTANT: &str = "securechat-kdf-salt-v1";
const TRIPCODE_CONSTANT: &str = "securechat-tripcode-v1";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Wrong key, truncated input or tampered ciphertext.
    #[error("decryption failed: authentication error")]
    AuthenticationFailure,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
}

/// Argon2id parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl KdfParams {
    /// Production parameters: 1 iteration, 64 MiB, 4 lanes.
    ///
    /// Every client must use these to arrive at the same key.
    pub const fn standard() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 1,
            parallelism: 4,
        }
    }

    /// Cheap parameters for tests. Keys derived with these do not match
    /// keys derived with [`standard`](Self::standard).
    pub const fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Get memory in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Get lane count.
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::standard()
    }
}

/// The symmetric key shared by everyone who knows the passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Derive the key for a passphrase with the standard parameters.
    pub fn derive(passphrase: &str) -> Result<Self, CryptoError> {
        Self::derive_with_params(passphrase, KdfParams::standard())
    }

    /// Derive with explicit Argon2 parameters.
    pub fn derive_with_params(passphrase: &str, params: KdfParams) -> Result<Self, CryptoError> {
        let salt = passphrase_salt(passphrase);
        let argon2 = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            params.to_argon2_params()?,
        );

        let mut output = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), &salt, &mut output)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        Ok(Self(output))
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a random key (for testing).
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Encrypt with a fresh random nonce.
    ///
    /// Returns `nonce ‖ ciphertext ‖ tag`. Encrypting the same plaintext
    /// twice yields different bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce ‖ ciphertext ‖ tag`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::AuthenticationFailure);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|_| CryptoError::AuthenticationFailure)?;

        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }
}

// Don't leak the key in debug output
impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

fn passphrase_salt(passphrase: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.update(KDF_SALT_CONSTANT.as_bytes());
    hasher.finalize().into()
}

/// Content address of a blob: hex BLAKE3 of the bytes.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// `#` plus six hex characters identifying whoever knows `secret`.
///
/// Appended to a display name so that impersonating `alice#3f09c1`
/// requires her secret, not just her name. Empty secret → empty string.
pub fn tripcode(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(TRIPCODE_CONSTANT.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("#{}", &digest[..6])
}
