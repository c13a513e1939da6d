//! Pairing link persistence.

use super::RelayStorage;
use crate::error::RelayError;
use loopsync_core::sync::PairingLink;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

impl RelayStorage {
    /// Create a link for `sync_key` stamped with `now`.
    pub fn insert_link(&self, sync_key: &str, now: i64) -> Result<PairingLink, RelayError> {
        let link = PairingLink {
            id: Uuid::new_v4().simple().to_string(),
            sync_key: sync_key.to_string(),
            created_at: now,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pairing_links (link_id, sync_key, created_at) VALUES (?1, ?2, ?3)",
            params![link.id, link.sync_key, link.created_at],
        )?;
        Ok(link)
    }

    /// Look up a link that has not yet expired at `now`.
    pub fn find_link(
        &self,
        id: &str,
        now: i64,
        ttl_secs: i64,
    ) -> Result<Option<PairingLink>, RelayError> {
        let conn = self.conn()?;
        let link = conn
            .query_row(
                "SELECT link_id, sync_key, created_at FROM pairing_links WHERE link_id = ?1",
                params![id],
                |row| {
                    Ok(PairingLink {
                        id: row.get(0)?,
                        sync_key: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(link.filter(|link| !link.is_expired(now, ttl_secs)))
    }

    /// Delete links created at or before `now - ttl_secs`. Returns the count.
    pub fn prune_links(&self, now: i64, ttl_secs: i64) -> Result<usize, RelayError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM pairing_links WHERE created_at <= ?1",
            params![now - ttl_secs],
        )?;
        Ok(removed)
    }
}
