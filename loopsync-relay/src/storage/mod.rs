//! SQLite storage backend for the relay.

pub mod links;

use crate::error::RelayError;
use loopsync_core::sync::{RepositoryError, SyncData, SyncRepository};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe relay storage.
#[derive(Clone)]
pub struct RelayStorage {
    conn: Arc<Mutex<Connection>>,
}

impl RelayStorage {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory()?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<(), anyhow::Error> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sync_data (
                sync_key TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                content TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pairing_links (
                link_id TEXT PRIMARY KEY,
                sync_key TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pairing_links_created
                ON pairing_links(created_at);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RelayError> {
        self.conn
            .lock()
            .map_err(|e| RelayError::Internal(format!("Lock error: {}", e)))
    }

    fn repo_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError(format!("Lock error: {}", e)))
    }

    pub fn sync_key_exists(&self, sync_key: &str) -> Result<bool, RelayError> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_data WHERE sync_key = ?1)",
            params![sync_key],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

fn repo_error(e: rusqlite::Error) -> RepositoryError {
    RepositoryError(e.to_string())
}

impl SyncRepository for RelayStorage {
    fn get(&self, key: &str) -> Result<Option<SyncData>, RepositoryError> {
        let conn = self.repo_conn()?;
        conn.query_row(
            "SELECT version, content FROM sync_data WHERE sync_key = ?1",
            params![key],
            |row| {
                Ok(SyncData {
                    version: row.get(0)?,
                    content: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(repo_error)
    }

    fn insert_if_absent(&self, key: &str, data: &SyncData) -> Result<bool, RepositoryError> {
        let conn = self.repo_conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sync_data (sync_key, version, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, data.version, data.content, chrono::Utc::now().timestamp()],
            )
            .map_err(repo_error)?;
        Ok(inserted == 1)
    }

    fn update(&self, key: &str, data: &SyncData) -> Result<(), RepositoryError> {
        let conn = self.repo_conn()?;
        conn.execute(
            "UPDATE sync_data SET version = ?2, content = ?3, updated_at = ?4
             WHERE sync_key = ?1",
            params![key, data.version, data.content, chrono::Utc::now().timestamp()],
        )
        .map_err(repo_error)?;
        Ok(())
    }
}
