//! Connection setup shared by every SQLite handle in the crate

use rusqlite::Connection;
use std::path::Path;

/// Apply the PRAGMAs every connection runs with.
///
/// - `journal_mode=WAL` so the job can read events while ingestion writes
/// - `synchronous=NORMAL` (safe under WAL)
/// - `temp_store=MEMORY` keeps map/reduce scratch tables off disk
/// - `busy_timeout` rides out short writer contention instead of failing
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Open a connection, creating the parent directory when missing
pub fn open_connection(db_path: &Path) -> Result<Connection, crate::error::StoreError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    Ok(conn)
}
