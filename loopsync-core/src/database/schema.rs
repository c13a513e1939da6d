//! SQLite-backed local store.

use crate::database::{LocalStore, Record};
use crate::{DatabaseError, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use tracing::debug;

const UPSERT_NEWER: &str = "INSERT INTO records (id, body, modified_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(id) DO UPDATE SET
        body = excluded.body,
        modified_at = excluded.modified_at
     WHERE excluded.modified_at > records.modified_at";

/// Local record database.
///
/// Snapshots contain only the `records` table. Anything else stored in the
/// same file, such as the sync preferences, never leaves the device.
pub struct SqliteStore {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    /// Open a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn,
            in_transaction: false,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            in_transaction: false,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        create_records_table(&self.conn)
    }

    /// Insert or replace a record, stamping it with the current time.
    pub fn put_record(&self, id: &str, body: &str) -> Result<Record> {
        let modified_at = chrono::Utc::now().timestamp_millis();
        self.put_record_at(id, body, modified_at)
    }

    /// Insert or replace a record with an explicit modification time.
    pub fn put_record_at(&self, id: &str, body: &str, modified_at: i64) -> Result<Record> {
        self.conn.execute(
            "INSERT INTO records (id, body, modified_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                modified_at = excluded.modified_at",
            params![id, body, modified_at],
        )?;

        Ok(Record {
            id: id.to_string(),
            body: body.to_string(),
            modified_at,
        })
    }

    pub fn get_record(&self, id: &str) -> Result<Option<Record>> {
        let result = self.conn.query_row(
            "SELECT id, body, modified_at FROM records WHERE id = ?1",
            params![id],
            Record::from_row,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::Sqlite(e)),
        }
    }

    pub fn list_records(&self) -> Result<Vec<Record>> {
        read_records(&self.conn)
    }
}

fn create_records_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY NOT NULL,
            body TEXT NOT NULL,
            modified_at INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn read_records(conn: &Connection) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare("SELECT id, body, modified_at FROM records ORDER BY id")?;
    let records = stmt
        .query_map([], Record::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

impl LocalStore for SqliteStore {
    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(DatabaseError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DatabaseError::Transaction("no open transaction".to_string()));
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DatabaseError::Transaction("no open transaction".to_string()));
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn export_snapshot(&self, path: &Path) -> Result<()> {
        if std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false) {
            return Err(DatabaseError::InvalidSnapshot(format!(
                "refusing to overwrite {}",
                path.display()
            )));
        }

        let records = self.list_records()?;
        let mut target = Connection::open(path)?;
        create_records_table(&target)?;

        let tx = target.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO records (id, body, modified_at) VALUES (?1, ?2, ?3)")?;
            for record in &records {
                stmt.execute(params![record.id, record.body, record.modified_at])?;
            }
        }
        tx.commit()?;

        debug!("Exported {} records to snapshot", records.len());
        Ok(())
    }

    fn import_snapshot(&mut self, path: &Path) -> Result<()> {
        if !self.in_transaction {
            return Err(DatabaseError::Transaction(
                "snapshot import requires an open transaction".to_string(),
            ));
        }

        let source = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| DatabaseError::InvalidSnapshot(e.to_string()))?;
        let incoming =
            read_records(&source).map_err(|e| DatabaseError::InvalidSnapshot(e.to_string()))?;

        let mut stmt = self.conn.prepare(UPSERT_NEWER)?;
        let mut applied = 0;
        for record in &incoming {
            applied += stmt.execute(params![record.id, record.body, record.modified_at])?;
        }

        debug!(
            "Merged snapshot: {} records received, {} applied",
            incoming.len(),
            applied
        );
        Ok(())
    }
}
