//! Persisted aggregation progress
//!
//! One record per cursor key holding the last event id a job has fully
//! merged into the sorted index. Shares the index database.

use crate::error::StoreResult;
use crate::id::SortableId;
use crate::index::IndexDb;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn read(&self, key: &str) -> StoreResult<Option<SortableId>>;
    async fn write(&self, key: &str, last_id: SortableId) -> StoreResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorRecord {
    last_id: SortableId,
    /// Unix millis of the write
    updated_at: i64,
}

pub struct SqliteCursorStore {
    db: Arc<IndexDb>,
}

impl SqliteCursorStore {
    pub fn new(db: Arc<IndexDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn read(&self, key: &str) -> StoreResult<Option<SortableId>> {
        self.db.with_conn(|conn| {
            let value: Option<String> = conn
                .query_row("SELECT value_json FROM kv WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            match value {
                Some(json) => {
                    let record: CursorRecord = serde_json::from_str(&json)?;
                    Ok(Some(record.last_id))
                }
                None => Ok(None),
            }
        })
    }

    async fn write(&self, key: &str, last_id: SortableId) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let record = CursorRecord {
            last_id,
            updated_at: now,
        };
        let json = serde_json::to_string(&record)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value_json, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value_json = excluded.value_json,
                    updated_at = excluded.updated_at",
                params![key, json, now],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_missing_then_write() {
        let dir = tempdir().unwrap();
        let store = SqliteCursorStore::new(Arc::new(IndexDb::new(dir.path().join("i.db"), false)));
        assert_eq!(store.read("ns:job").await.unwrap(), None);

        let first = SortableId::new(100, [1, 2, 3, 4, 5], 7);
        let second = SortableId::new(101, [1, 2, 3, 4, 5], 0);
        store.write("ns:job", first).await.unwrap();
        assert_eq!(store.read("ns:job").await.unwrap(), Some(first));
        store.write("ns:job", second).await.unwrap();
        assert_eq!(store.read("ns:job").await.unwrap(), Some(second));
        assert_eq!(store.read("ns:job:Json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("i.db");
        let id = SortableId::new(5, [0; 5], 1);
        SqliteCursorStore::new(Arc::new(IndexDb::new(&path, true)))
            .write("k", id)
            .await
            .unwrap();
        let reopened = SqliteCursorStore::new(Arc::new(IndexDb::new(&path, true)));
        assert_eq!(reopened.read("k").await.unwrap(), Some(id));
    }
}
