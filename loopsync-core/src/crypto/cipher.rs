//! AES-256-GCM encryption, secure randomness and key separation.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key
//! - 96-bit (12 byte) IV
//! - 128-bit authentication tag
//!
//! The wire layout of an encrypted message is `iv(12) || ciphertext || tag(16)`.

use crate::crypto::hash::HmacSha256;
use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;

/// AES-GCM IV size in bytes.
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// A 256-bit symmetric key.
///
/// Used both for the user's master key and for keys derived from it by
/// [`derive_key`]. The bytes are wiped when the key is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    bytes: [u8; KEY_SIZE],
}

impl Key {
    /// Generate a new random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a key from raw bytes (use with caution)
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    got: bytes.len(),
                })?;
        Ok(Self { bytes })
    }

    /// Decode a key stored as standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(format!("Invalid key encoding: {}", e)))?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    /// Encode the key as standard base64 for the preferences store.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.bytes)
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..].ct_eq(&other.bytes[..]).into()
    }
}

impl Eq for Key {}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Fill a fresh buffer of `len` bytes from the OS RNG.
pub fn secure_random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Generate a random IV for a single encryption.
pub fn random_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Derive a purpose-specific key: `HMAC-SHA256(master, name)`.
///
/// This is key separation, not a password KDF. `name` must be a fixed,
/// application-defined label such as `"database"`.
pub fn derive_key(master: &Key, name: &str) -> Result<Key> {
    let mut mac = HmacSha256::new(master.as_bytes())?;
    mac.update(name);
    Ok(Key::from_bytes(mac.finalize()))
}

/// Encrypt `plaintext` under `key` with the caller-supplied IV.
///
/// Returns `iv || ciphertext || tag`. Never reuse an IV with the same key.
pub fn aead_encrypt(key: &Key, plaintext: &[u8], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(iv);

    // aes-gcm appends the tag, so this is ciphertext || tag
    let ciphertext_with_tag = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    let mut envelope = Vec::with_capacity(IV_SIZE + ciphertext_with_tag.len());
    envelope.extend_from_slice(iv);
    envelope.extend_from_slice(&ciphertext_with_tag);
    Ok(envelope)
}

/// Decrypt an `iv || ciphertext || tag` envelope produced by [`aead_encrypt`].
///
/// Fails with [`CryptoError::AuthenticationFailed`] if the tag does not verify.
pub fn aead_decrypt(key: &Key, envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < IV_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "Envelope too short: {} bytes",
            envelope.len()
        )));
    }

    let (iv, ciphertext_with_tag) = envelope.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext_with_tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
