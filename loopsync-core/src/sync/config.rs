//! Sync configuration persisted on this device.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::{DatabaseError, Result};

/// Sync configuration for this device.
///
/// `local_version` is the version this device will propose on its next push.
/// `0` means "unknown": the next sync pulls unconditionally before pushing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub sync_enabled: bool,
    pub sync_key: Option<String>,
    /// Base64 master key. The snapshot key is derived from it on every sync.
    pub encryption_key: Option<String>,
    pub relay_url: Option<String>,
    pub local_version: i64,
    pub dirty: bool,
    pub last_sync_at: Option<i64>,
}

impl SyncConfig {
    /// Turn sync off and forget both keys.
    pub fn disable_sync(&mut self) {
        self.sync_enabled = false;
        self.sync_key = None;
        self.encryption_key = None;
    }

    /// Note a local modification: the first change after a sync claims the
    /// next version, later ones ride along with it. The version saturates
    /// at `i64::MAX`; the server rejects it as a conflict.
    pub fn record_local_change(&mut self) {
        if !self.dirty {
            self.local_version = self.local_version.saturating_add(1);
        }
        self.dirty = true;
    }

    /// Load sync config from the database. Returns default if no row exists.
    pub fn load(conn: &rusqlite::Connection) -> Result<Self> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='sync_metadata')",
            [],
            |row| row.get(0),
        )?;

        if !exists {
            return Ok(Self::default());
        }

        let result = conn.query_row(
            "SELECT sync_enabled, sync_key, encryption_key, relay_url,
                    local_version, dirty, last_sync_at
             FROM sync_metadata WHERE id = 1",
            [],
            |row| {
                Ok(SyncConfig {
                    sync_enabled: row.get(0)?,
                    sync_key: row.get(1)?,
                    encryption_key: row.get(2)?,
                    relay_url: row.get(3)?,
                    local_version: row.get(4)?,
                    dirty: row.get(5)?,
                    last_sync_at: row.get(6)?,
                })
            },
        );

        match result {
            Ok(config) => Ok(config),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Self::default()),
            Err(e) => Err(DatabaseError::Sqlite(e)),
        }
    }

    /// Save sync config to the database (upsert).
    pub fn save(&self, conn: &rusqlite::Connection) -> Result<()> {
        create_metadata_table(conn)?;
        conn.execute(
            "INSERT INTO sync_metadata (id, sync_enabled, sync_key, encryption_key, relay_url,
                                        local_version, dirty, last_sync_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                sync_enabled = excluded.sync_enabled,
                sync_key = excluded.sync_key,
                encryption_key = excluded.encryption_key,
                relay_url = excluded.relay_url,
                local_version = excluded.local_version,
                dirty = excluded.dirty,
                last_sync_at = excluded.last_sync_at",
            rusqlite::params![
                self.sync_enabled,
                self.sync_key,
                self.encryption_key,
                self.relay_url,
                self.local_version,
                self.dirty,
                self.last_sync_at,
            ],
        )?;

        Ok(())
    }
}

fn create_metadata_table(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            sync_enabled INTEGER NOT NULL DEFAULT 0,
            sync_key TEXT,
            encryption_key TEXT,
            relay_url TEXT,
            local_version INTEGER NOT NULL DEFAULT 0,
            dirty INTEGER NOT NULL DEFAULT 0,
            last_sync_at INTEGER
        )",
        [],
    )?;
    Ok(())
}

/// Persistent key/value settings read and written by the sync manager.
pub trait Preferences: Send + Sync {
    fn load(&self) -> Result<SyncConfig>;

    fn save(&self, config: &SyncConfig) -> Result<()>;
}

/// Preferences kept in the `sync_metadata` table of a SQLite file.
pub struct SqlitePreferences {
    conn: Mutex<rusqlite::Connection>,
}

impl SqlitePreferences {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        create_metadata_table(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        create_metadata_table(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))
    }
}

impl Preferences for SqlitePreferences {
    fn load(&self) -> Result<SyncConfig> {
        let conn = self.conn()?;
        SyncConfig::load(&conn)
    }

    fn save(&self, config: &SyncConfig) -> Result<()> {
        let conn = self.conn()?;
        config.save(&conn)
    }
}

/// Preferences held in memory only.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    config: Mutex<SyncConfig>,
}

impl MemoryPreferences {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl Preferences for MemoryPreferences {
    fn load(&self) -> Result<SyncConfig> {
        self.config
            .lock()
            .map(|config| config.clone())
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))
    }

    fn save(&self, config: &SyncConfig) -> Result<()> {
        let mut current = self
            .config
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))?;
        *current = config.clone();
        Ok(())
    }
}
