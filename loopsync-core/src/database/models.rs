//! Database models for synced records.

use serde::{Deserialize, Serialize};

/// A record stored in the local database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub body: String,
    /// Milliseconds since the Unix epoch; the newer side wins on merge.
    pub modified_at: i64,
}

impl Record {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            body: row.get(1)?,
            modified_at: row.get(2)?,
        })
    }
}
