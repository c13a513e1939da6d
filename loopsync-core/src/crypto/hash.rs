//! Streaming SHA-256 and HMAC-SHA256.
//!
//! Both hashers accept input a byte at a time or in bulk and produce a
//! 32-byte digest on `finalize`.

use crate::crypto::{CryptoError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Size of a SHA-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Incremental SHA-256.
#[derive(Clone, Default)]
pub struct Sha256Hasher {
    inner: Sha256,
}

impl Sha256Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_byte(&mut self, byte: u8) -> &mut Self {
        self.inner.update([byte]);
        self
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.inner.update(data.as_ref());
        self
    }

    pub fn finalize(&self) -> [u8; DIGEST_SIZE] {
        self.inner.clone().finalize().into()
    }
}

/// One-shot SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(data).into()
}

/// Incremental HMAC-SHA256, initialized with a key of any length.
#[derive(Clone)]
pub struct HmacSha256 {
    inner: Hmac<Sha256>,
}

impl HmacSha256 {
    pub fn new(key: &[u8]) -> Result<Self> {
        let inner = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: DIGEST_SIZE,
                got: key.len(),
            }
        })?;
        Ok(Self { inner })
    }

    pub fn update_byte(&mut self, byte: u8) -> &mut Self {
        self.inner.update(&[byte]);
        self
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.inner.update(data.as_ref());
        self
    }

    pub fn finalize(&self) -> [u8; DIGEST_SIZE] {
        self.inner.clone().finalize().into_bytes().into()
    }
}
