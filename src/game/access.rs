//! Access Control
//!
//! Persistent blocklist of identities barred from claiming the throne.
//! Enforced exactly once, when a paid session opens: an identity blocked
//! while its submission is already in flight still commits. There is no
//! unblock operation.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::game::ledger::{LedgerError, UserId};

/// Reason recorded when the admin does not supply one.
pub const DEFAULT_BLOCK_REASON: &str = "blocked by admin";

/// One blocklist row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// The barred identity.
    pub user_id: UserId,
    /// Why they were blocked.
    pub reason: String,
    /// When the block (or its latest update) was recorded.
    pub created_at: DateTime<Utc>,
}

/// Blocklist over the ledger's database. Cloning shares the connection.
#[derive(Clone)]
pub struct Blocklist {
    conn: Arc<Mutex<Connection>>,
}

impl Blocklist {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks an identity. Idempotent: re-blocking replaces the reason and
    /// timestamp without growing the table.
    pub fn block(&self, user_id: UserId, reason: &str) -> Result<(), LedgerError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO blocklist (user_id, reason, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id as i64, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Whether an identity is currently blocked.
    pub fn is_blocked(&self, user_id: UserId) -> Result<bool, LedgerError> {
        let conn = self.conn();
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blocklist WHERE user_id = ?1",
                params![user_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Up to `limit` entries ordered by identity, for the admin view.
    pub fn entries(&self, limit: u32) -> Result<Vec<BlockEntry>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, reason, created_at
             FROM blocklist
             ORDER BY user_id ASC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                let created_raw: String = row.get(2)?;
                let created_at = DateTime::parse_from_rfc3339(&created_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                Ok(BlockEntry {
                    user_id: row.get::<_, i64>(0)? as u64,
                    reason: row.get(1)?,
                    created_at,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ledger::ThroneLedger;

    fn blocklist() -> Blocklist {
        ThroneLedger::open_in_memory().unwrap().blocklist()
    }

    #[test]
    fn test_block_and_check() {
        let list = blocklist();

        assert!(!list.is_blocked(5).unwrap());
        list.block(5, "abuse").unwrap();
        assert!(list.is_blocked(5).unwrap());
        assert!(!list.is_blocked(6).unwrap());
    }

    #[test]
    fn test_block_is_idempotent_upsert() {
        let list = blocklist();

        list.block(5, "first reason").unwrap();
        list.block(5, "second reason").unwrap();

        let entries = list.entries(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, 5);
        assert_eq!(entries[0].reason, "second reason");
    }

    #[test]
    fn test_entries_ordered_and_limited() {
        let list = blocklist();
        list.block(9, DEFAULT_BLOCK_REASON).unwrap();
        list.block(3, DEFAULT_BLOCK_REASON).unwrap();
        list.block(7, DEFAULT_BLOCK_REASON).unwrap();

        let entries = list.entries(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].user_id, 3);
        assert_eq!(entries[1].user_id, 7);
    }
}
