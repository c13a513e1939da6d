//! Loopsync Core Library
//!
//! End-to-end encrypted snapshot sync: cryptographic primitives, the sync
//! protocol contract and its HTTP client, the server-side sync store and the
//! client-side orchestrator, together with the SQLite collaborators the
//! orchestrator drives.

pub mod crypto;
pub mod database;
pub mod sync;

pub use crypto::{derive_key, CryptoError, Key, DATABASE_KEY_NAME};
pub use database::{LocalStore, Record, SqliteStore};
pub use sync::{
    MemoryPreferences, Preferences, ServerError, SqlitePreferences, SyncConfig, SyncData,
    SyncError, SyncManager, SyncServer, SyncState, SyncStore,
};

#[cfg(feature = "client")]
pub use sync::RemoteSyncServer;

use thiserror::Error;

/// Result type for local database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Errors raised by the local SQLite collaborators.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
