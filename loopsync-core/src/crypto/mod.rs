//! Cryptographic primitives for snapshot sync.
//!
//! This module provides:
//! - SHA-256 and HMAC-SHA256 streaming hashers
//! - AES-256-GCM encryption/decryption
//! - Secure randomness and key separation by name
//! - Mnemonic backup of the master key
//! - The base64 snapshot envelope

pub mod cipher;
pub mod envelope;
pub mod hash;
pub mod mnemonic;

pub use cipher::{
    aead_decrypt, aead_encrypt, derive_key, random_iv, secure_random_bytes, Key, IV_SIZE,
    KEY_SIZE, TAG_SIZE,
};
pub use envelope::{
    decrypt_from_string, decrypt_string_to_file, encrypt_file_to_string, encrypt_to_string,
};
pub use hash::{sha256, HmacSha256, Sha256Hasher};
pub use mnemonic::MnemonicError;

use thiserror::Error;

/// Name under which the snapshot encryption key is derived from the master key.
pub const DATABASE_KEY_NAME: &str = "database";

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Mnemonic error: {0}")]
    Mnemonic(#[from] MnemonicError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
