//! Encrypted snapshot envelope.
//!
//! A snapshot travels as `base64(iv(12) || ciphertext || tag(16))`. The relay
//! stores this string verbatim and never looks inside it.

use crate::crypto::cipher::{aead_decrypt, aead_encrypt, random_iv, Key};
use crate::crypto::{CryptoError, Result};
use base64::Engine;
use std::path::Path;

/// Encrypt `plaintext` under `key` with a fresh IV and encode it as base64.
pub fn encrypt_to_string(key: &Key, plaintext: &[u8]) -> Result<String> {
    let envelope = aead_encrypt(key, plaintext, &random_iv())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(envelope))
}

/// Decode and decrypt an envelope produced by [`encrypt_to_string`].
pub fn decrypt_from_string(key: &Key, envelope: &str) -> Result<Vec<u8>> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(envelope.trim())
        .map_err(|e| CryptoError::InvalidEncoding(format!("Invalid envelope: {}", e)))?;
    aead_decrypt(key, &raw)
}

/// Read a snapshot file and encrypt its contents.
pub fn encrypt_file_to_string(key: &Key, path: &Path) -> Result<String> {
    let plaintext = std::fs::read(path)?;
    encrypt_to_string(key, &plaintext)
}

/// Decrypt an envelope and write the plaintext snapshot to `path`.
///
/// Nothing is written if decryption fails.
pub fn decrypt_string_to_file(key: &Key, envelope: &str, path: &Path) -> Result<()> {
    let plaintext = decrypt_from_string(key, envelope)?;
    std::fs::write(path, plaintext)?;
    Ok(())
}
