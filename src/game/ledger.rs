//! Throne Pricing Ledger
//!
//! Append-only SQLite store of every throne claim. The record with the
//! highest id is the single current throne; history is only ever mutated
//! by [`ThroneLedger::rollback_last`] and [`ThroneLedger::reset`].
//!
//! The connection is wrapped in a `Mutex`, so every mutating statement runs
//! as one critical section: a price read, the subsequent append, and an
//! administrative rollback can never interleave mid-statement. Readers see
//! committed rows only.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SEED_CAPTION, SEED_PRICE};

/// Identity of a participant on the messaging platform. 0 is reserved for
/// the seed record.
pub type UserId = u64;

/// Schema for the throne history and the blocklist that shares the database.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS throne_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    price INTEGER NOT NULL,
    photo_ref TEXT NOT NULL,
    caption TEXT NOT NULL,
    display TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_throne_price ON throne_history(price DESC);
CREATE INDEX IF NOT EXISTS idx_throne_user ON throne_history(user_id);

CREATE TABLE IF NOT EXISTS blocklist (
    user_id INTEGER PRIMARY KEY,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One committed throne claim. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroneRecord {
    /// Monotonic record id assigned by the store. Highest id = current throne.
    pub id: u64,
    /// Claimant identity. 0 for the seed record.
    pub user_id: UserId,
    /// Asking price established by this claim.
    pub price: u64,
    /// Opaque handle into the messaging platform's file storage. Empty for
    /// the seed.
    pub photo_ref: String,
    /// Claimant caption, at most 100 characters. May be empty.
    pub caption: String,
    /// Public display form: a handle like `@name`, the anonymity marker, or
    /// empty for the seed.
    pub display: String,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

impl ThroneRecord {
    /// The values a freshly seeded store presents. Also answers `current()`
    /// on an empty table, which cannot happen after `open` but keeps the
    /// read path total.
    pub fn seed() -> Self {
        Self {
            id: 0,
            user_id: 0,
            price: SEED_PRICE,
            photo_ref: String::new(),
            caption: SEED_CAPTION.to_string(),
            display: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// A claim ready to be committed. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct ThroneClaim {
    /// Claimant identity.
    pub user_id: UserId,
    /// Asking price this claim establishes.
    pub price: u64,
    /// Photo handle to publish.
    pub photo_ref: String,
    /// Caption to publish.
    pub caption: String,
    /// Resolved display form (handle or anonymity marker).
    pub display: String,
}

/// The append-only throne ledger backed by SQLite.
pub struct ThroneLedger {
    conn: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    path: Option<PathBuf>,
}

impl ThroneLedger {
    /// Opens or creates the ledger at `path`. Creates the schema and, if the
    /// history is empty, inserts the seed record.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::initialize(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory ledger for testing.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Creates the schema and seeds an empty history.
    fn initialize(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(SCHEMA)?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM throne_history", [], |row| {
            row.get(0)
        })?;
        if count == 0 {
            Self::insert_seed(conn)?;
        }

        Ok(())
    }

    fn insert_seed(conn: &Connection) -> Result<(), rusqlite::Error> {
        let seed = ThroneRecord::seed();
        conn.execute(
            "INSERT INTO throne_history (user_id, price, photo_ref, caption, display, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                seed.user_id as i64,
                seed.price as i64,
                seed.photo_ref,
                seed.caption,
                seed.display,
                seed.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// A poisoned lock still yields a usable connection; statements are
    /// atomic, so recover rather than propagate the panic.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Shares the underlying connection for blocklist access. Blocklist
    /// writes serialize with ledger writes through the same mutex.
    pub(crate) fn share_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// A blocklist handle over the same database.
    pub fn blocklist(&self) -> crate::game::access::Blocklist {
        crate::game::access::Blocklist::new(self.share_connection())
    }

    /// Appends a claim, assigning the next id. The only way new history is
    /// created after the seed.
    pub fn append(&self, claim: ThroneClaim) -> Result<ThroneRecord, LedgerError> {
        let created_at = Utc::now();
        // SQLite integers are signed; a saturated u64 price must not wrap
        // negative and corrupt the price ordering.
        let price = claim.price.min(i64::MAX as u64);
        let conn = self.conn();

        conn.execute(
            "INSERT INTO throne_history (user_id, price, photo_ref, caption, display, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                claim.user_id as i64,
                price as i64,
                claim.photo_ref,
                claim.caption,
                claim.display,
                created_at.to_rfc3339(),
            ],
        )?;

        let id = conn.last_insert_rowid() as u64;
        Ok(ThroneRecord {
            id,
            user_id: claim.user_id,
            price,
            photo_ref: claim.photo_ref,
            caption: claim.caption,
            display: claim.display,
            created_at,
        })
    }

    /// The current throne: the record with the highest id. Falls back to the
    /// seed values if the table is somehow empty.
    pub fn current(&self) -> Result<ThroneRecord, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, price, photo_ref, caption, display, created_at
             FROM throne_history
             ORDER BY id DESC
             LIMIT 1",
        )?;

        let record = stmt.query_row([], Self::row_to_record).optional()?;
        Ok(record.unwrap_or_else(ThroneRecord::seed))
    }

    /// Up to `limit` records ordered by price descending, seed excluded.
    /// Equal prices order by ascending id (earlier claim first).
    pub fn top_by_price(&self, limit: u32) -> Result<Vec<ThroneRecord>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, price, photo_ref, caption, display, created_at
             FROM throne_history
             WHERE user_id > 0
             ORDER BY price DESC, id ASC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Up to `limit` records, newest first. Includes the seed.
    pub fn recent(&self, limit: u32) -> Result<Vec<ThroneRecord>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, price, photo_ref, caption, display, created_at
             FROM throne_history
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Deletes the newest record, restoring the previous throne. Returns
    /// false without mutating anything when only the seed (or a single
    /// record) remains. The guard and the delete are one statement, so a
    /// concurrent append cannot slip between them.
    pub fn rollback_last(&self) -> Result<bool, LedgerError> {
        let conn = self.conn();
        let changes = conn.execute(
            "DELETE FROM throne_history
             WHERE id = (SELECT MAX(id) FROM throne_history)
               AND (SELECT COUNT(*) FROM throne_history) > 1",
            [],
        )?;
        Ok(changes > 0)
    }

    /// Clears all history and re-inserts the seed in one transaction. The
    /// blocklist is untouched.
    pub fn reset(&self) -> Result<(), LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM throne_history", [])?;
        Self::insert_seed(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Number of records in the history, seed included.
    pub fn record_count(&self) -> Result<u64, LedgerError> {
        let conn = self.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM throne_history", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThroneRecord> {
        let created_raw: String = row.get(6)?;
        let created_at = DateTime::parse_from_rfc3339(&created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        Ok(ThroneRecord {
            id: row.get::<_, i64>(0)? as u64,
            user_id: row.get::<_, i64>(1)? as u64,
            price: row.get::<_, i64>(2)? as u64,
            photo_ref: row.get(3)?,
            caption: row.get(4)?,
            display: row.get(5)?,
            created_at,
        })
    }
}
