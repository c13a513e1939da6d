//! Local data store driven by the sync orchestrator.
//!
//! The orchestrator never looks at individual records. It only needs to
//! wrap an import in a transaction and move whole snapshots in and out of
//! the store by file path, which is what [`LocalStore`] captures.

pub mod models;
pub mod schema;

pub use models::Record;
pub use schema::SqliteStore;

use crate::Result;
use std::path::Path;

/// Snapshot-level access to the local store.
pub trait LocalStore: Send {
    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Write a self-contained snapshot of the store to `path`.
    fn export_snapshot(&self, path: &Path) -> Result<()>;

    /// Merge the snapshot at `path` into the store.
    ///
    /// Must be called inside a transaction opened by [`begin_transaction`];
    /// on error the caller rolls back and nothing is applied.
    ///
    /// [`begin_transaction`]: LocalStore::begin_transaction
    fn import_snapshot(&mut self, path: &Path) -> Result<()>;
}
