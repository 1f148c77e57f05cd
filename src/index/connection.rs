//! Lazily opened connection to the index database
//!
//! The sorted index and the cursor store share one SQLite file. The
//! connection is opened on first use; in bulk mode it stays open across
//! calls, otherwise it is closed after every call.

use crate::error::{StoreError, StoreResult};
use crate::sqlite_pragma::open_connection;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct IndexDb {
    path: PathBuf,
    bulk: bool,
    conn: Mutex<Option<Connection>>,
}

impl IndexDb {
    pub fn new(path: impl AsRef<Path>, bulk: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            bulk,
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_bulk(&self) -> bool {
        self.bulk
    }

    /// Whether a connection is currently held open
    pub fn is_connected(&self) -> bool {
        self.conn.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Run `f` against the connection, opening it first if needed
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut slot = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                let conn = open_connection(&self.path)?;
                migrate(&conn)?;
                log::debug!("🔌 Index connection opened: {}", self.path.display());
                conn
            }
        };

        let result = f(&mut conn);

        // non-bulk: `conn` drops (closes) here
        if self.bulk {
            *slot = Some(conn);
        }
        result
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sorted_index (
            index_key TEXT NOT NULL,
            member TEXT NOT NULL,
            score INTEGER NOT NULL,
            PRIMARY KEY (index_key, member)
        );

        CREATE INDEX IF NOT EXISTS idx_sorted_index_score ON sorted_index(index_key, score);

        CREATE TABLE IF NOT EXISTS index_fields (
            index_key TEXT NOT NULL,
            member TEXT NOT NULL,
            fields_json TEXT NOT NULL,
            PRIMARY KEY (index_key, member)
        );

        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        ",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_non_bulk_closes_after_call() {
        let dir = tempdir().unwrap();
        let db = IndexDb::new(dir.path().join("index.db"), false);
        assert!(!db.is_connected());

        let tables: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 3);
        assert!(!db.is_connected());
    }

    #[test]
    fn test_bulk_keeps_connection() {
        let dir = tempdir().unwrap();
        let db = IndexDb::new(dir.path().join("nested").join("index.db"), true);
        db.with_conn(|_| Ok(())).unwrap();
        assert!(db.is_connected());
        assert!(db.path().exists());
    }
}
