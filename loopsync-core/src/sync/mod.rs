//! End-to-end encrypted snapshot sync.
//!
//! Each device pushes an encrypted snapshot of its whole local store to a
//! relay under a shared sync key:
//! - A versioned slot per sync key with optimistic concurrency
//! - AES-256-GCM envelopes under a key derived from the master key
//! - Pull-merge-push cycles driven by [`SyncManager`]
//! - Pairing links so a second device can discover the sync key

#[cfg(feature = "client")]
pub mod client;
pub mod config;
pub mod engine;
pub mod models;
pub mod server;
pub mod store;

#[cfg(feature = "client")]
pub use client::RemoteSyncServer;
pub use config::{MemoryPreferences, Preferences, SqlitePreferences, SyncConfig};
pub use engine::{SyncManager, SyncOutcome, SyncState, SyncStatus};
pub use models::{PairingLink, SyncData};
pub use server::{ServerError, ServerResult, SyncServer};
pub use store::{MemoryRepository, RepositoryError, SyncRepository, SyncStore};

use crate::crypto::CryptoError;
use crate::DatabaseError;
use thiserror::Error;

/// Why a sync attempt did not complete.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Network unavailable")]
    ConnectionLost,

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Push still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("Server reported an unusable version: {0}")]
    InvalidRemoteVersion(i64),

    #[error("Failed to import remote snapshot: {0}")]
    Import(String),

    #[error("Sync is not configured: {0}")]
    NotConfigured(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Transient failures leave sync enabled; the next trigger retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Server(e) => e.is_transient(),
            Self::ConnectionLost
            | Self::Cancelled
            | Self::Import(_)
            | Self::InvalidRemoteVersion(_)
            | Self::ConflictRetriesExhausted { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::Server(ServerError::ServiceUnavailable).is_transient());
        assert!(SyncError::ConnectionLost.is_transient());
        assert!(SyncError::Cancelled.is_transient());
        assert!(SyncError::Import("bad".into()).is_transient());
        assert!(SyncError::ConflictRetriesExhausted { attempts: 5 }.is_transient());
        assert!(SyncError::InvalidRemoteVersion(i64::MAX).is_transient());

        assert!(!SyncError::Server(ServerError::KeyNotFound).is_transient());
        assert!(!SyncError::Server(ServerError::EditConflict).is_transient());
        assert!(!SyncError::Server(ServerError::Transport("x".into())).is_transient());
        assert!(!SyncError::Crypto(CryptoError::AuthenticationFailed).is_transient());
        assert!(!SyncError::NotConfigured("no key".into()).is_transient());
    }
}
