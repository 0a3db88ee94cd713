//! SQLite ledger store
//!
//! Relational state for the progress and reward pipeline: requirement
//! definitions, per-user progress, missions, wallets, transactions,
//! notifications, and the envelope bookkeeping tables used by the consumer.
//!
//! ## Tables
//!
//! - `titles`, `title_requirements`, `title_progress`, `user_titles`
//! - `missions`, `mission_requirements`, `mission_progress`,
//!   `mission_assignments`, `user_missions`, `mission_title_rewards`
//! - `users`, `wallets`, `transaction_types`, `transactions`,
//!   `experience_grants`, `level_titles`
//! - `notifications`
//! - `processed_envelopes`, `dead_letters`
//!
//! Row-level functions live in the submodules and take a `&Connection` (reads)
//! or `&mut Connection` (writes needing a transaction). Services go through
//! [`LedgerDb::with_conn`] / [`LedgerDb::with_conn_mut`].

pub mod envelopes;
pub mod missions;
pub mod models;
pub mod notifications;
pub mod progress;
pub mod requirements;
pub mod schema;
pub mod titles;
pub mod transactions;
pub mod users;
pub mod wallets;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::types::{LaurelError, Result};

/// SQLite database for the ledger
pub struct LedgerDb {
    conn: Mutex<Connection>,
}

impl LedgerDb {
    /// Open or create the ledger database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening SQLite ledger at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| LaurelError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL for concurrent readers, busy timeout for writers from other processes
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| LaurelError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite ledger");

        let conn = Connection::open_in_memory().map_err(|e| {
            LaurelError::Database(format!("Failed to open in-memory SQLite: {}", e))
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| LaurelError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read (or single-statement write) against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LaurelError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write that needs exclusive access (transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| LaurelError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts for the main ledger tables
    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })
                    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                user_count: count("users")?,
                transaction_count: count("transactions")?,
                notification_count: count("notifications")?,
                processed_envelope_count: count("processed_envelopes")?,
                dead_letter_count: count("dead_letters")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub user_count: u64,
    pub transaction_count: u64,
    pub notification_count: u64,
    pub processed_envelope_count: u64,
    pub dead_letter_count: u64,
}

/// Current UTC time as an RFC 3339 string, the format stored in timestamp columns
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub use models::{
    DeadLetterRow, MissionRow, MissionStatus, NotificationRow, ProgressRow, RequirementKind,
    RequirementRow, TitleRow, TransactionKind, TransactionRow, UserMissionRow, UserRow,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = LedgerDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.user_count, 0);
        assert_eq!(stats.dead_letter_count, 0);
    }

    #[test]
    fn test_open_file_is_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let db = LedgerDb::open(&path).unwrap();
            db.with_conn_mut(|conn| users::create_user(conn, Some("a@example.com")))
                .unwrap();
        }

        let db = LedgerDb::open(&path).unwrap();
        assert_eq!(db.stats().unwrap().user_count, 1);
    }
}
