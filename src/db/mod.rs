//! Embedded SQLite store for indexed skills, governance documents, and
//! accountability records.
//!
//! Single file, WAL mode. One connection guarded by a mutex: every write is
//! serialized, which is also what gives each sign-off its one-transaction
//! atomicity guarantee.
//!
//! ## Tables
//!
//! - `skills_index` / `skills_fts` - indexed skill descriptors + full-text mirror
//! - `governance_cache` / `governance_precedence` - manifest-backed doc index
//! - `task_accountability` - one row per unit of work
//! - `sign_off_receipts`, `ai_mode_transitions` - append-only audit logs
//! - `index_metadata` - last-run bookkeeping per indexer

pub mod accountability;
pub mod governance;
pub mod meta;
pub mod schema;
pub mod skills;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::CoreError;

/// Handle to the embedded store. Construct one per service instance and pass
/// it to each component; there is no process-wide singleton.
pub struct StoreDb {
    conn: Mutex<Connection>,
}

impl StoreDb {
    /// Open or create the store under the given data directory
    pub fn open(data_dir: &Path) -> Result<Self, CoreError> {
        let db_path = data_dir.join("accord.db");
        info!("Opening store at {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        // WAL for concurrent readers alongside the single writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self, CoreError> {
        debug!("Opening in-memory store");
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, CoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write operation with exclusive access (transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts per table, for the status surface
    pub fn stats(&self) -> Result<DbStats, CoreError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, CoreError> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })?;
                Ok(n as u64)
            };

            Ok(DbStats {
                skills: count("skills_index")?,
                governance_docs: count("governance_cache")?,
                tasks: count("task_accountability")?,
                receipts: count("sign_off_receipts")?,
                transitions: count("ai_mode_transitions")?,
            })
        })
    }
}

/// Store statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub skills: u64,
    pub governance_docs: u64,
    pub tasks: u64,
    pub receipts: u64,
    pub transitions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_initializes_schema() {
        let db = StoreDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.skills, 0);
        assert_eq!(stats.tasks, 0);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = StoreDb::open(dir.path()).unwrap();
        assert_eq!(db.stats().unwrap().governance_docs, 0);
        // Reopen over the same file
        drop(db);
        let db = StoreDb::open(dir.path()).unwrap();
        assert_eq!(db.stats().unwrap().governance_docs, 0);
    }
}
