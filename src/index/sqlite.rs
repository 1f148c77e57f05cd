//! SQLite-backed sorted index
//!
//! Pointers (`member`, `score`) live in `sorted_index`; field records live in
//! `index_fields`. An upsert runs in two steps, pointers first, then fields,
//! each in its own transaction. A crash between the two leaves pointers
//! without fields, which `range_query` reads as zeroed fields.

use super::{
    IndexChanges, IndexDb, IndexEntry, IndexFields, MergeFn, SortedIndexStore, UpsertStats,
};
use crate::error::StoreResult;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct SqliteSortedIndex {
    db: Arc<IndexDb>,
}

impl SqliteSortedIndex {
    pub fn new(db: Arc<IndexDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SortedIndexStore for SqliteSortedIndex {
    async fn upsert(
        &self,
        index_key: &str,
        changes: &IndexChanges,
        merge: &MergeFn,
    ) -> StoreResult<UpsertStats> {
        if changes.is_empty() {
            return Ok(UpsertStats::default());
        }

        self.db.with_conn(|conn| {
            // Step 1: pointers for members not yet in the index
            let tx = conn.transaction()?;
            let mut inserted = BTreeSet::new();
            {
                let mut insert = tx.prepare_cached(
                    "INSERT OR IGNORE INTO sorted_index (index_key, member, score)
                     VALUES (?1, ?2, ?3)",
                )?;
                for (member, change) in changes {
                    if insert.execute(params![index_key, member, change.score])? > 0 {
                        inserted.insert(member.as_str());
                    }
                }
            }
            tx.commit()?;

            // Step 2: field records; straight write for new members, merge otherwise
            let tx = conn.transaction()?;
            {
                let mut select = tx.prepare_cached(
                    "SELECT fields_json FROM index_fields WHERE index_key = ?1 AND member = ?2",
                )?;
                let mut write = tx.prepare_cached(
                    "INSERT INTO index_fields (index_key, member, fields_json)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(index_key, member) DO UPDATE SET fields_json = excluded.fields_json",
                )?;

                for (member, change) in changes {
                    let fields = if inserted.contains(member.as_str()) {
                        change.fields
                    } else {
                        let existing: Option<String> = select
                            .query_row(params![index_key, member], |row| row.get(0))
                            .optional()?;
                        let existing = match existing {
                            Some(json) => serde_json::from_str(&json)?,
                            None => IndexFields::default(),
                        };
                        merge(&existing, &change.fields)
                    };
                    write.execute(params![index_key, member, serde_json::to_string(&fields)?])?;
                }
            }
            tx.commit()?;

            let stats = UpsertStats {
                inserted: inserted.len(),
                merged: changes.len() - inserted.len(),
            };
            log::debug!(
                "📇 Upsert {}: {} inserted, {} merged",
                index_key,
                stats.inserted,
                stats.merged
            );
            Ok(stats)
        })
    }

    async fn range_query(
        &self,
        index_key: &str,
        min_score: i64,
        max_score: i64,
    ) -> StoreResult<Vec<IndexEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT s.member, s.score, f.fields_json
                 FROM sorted_index s
                 LEFT JOIN index_fields f
                   ON f.index_key = s.index_key AND f.member = s.member
                 WHERE s.index_key = ?1 AND s.score >= ?2 AND s.score <= ?3
                 ORDER BY s.score ASC, s.member ASC",
            )?;
            let rows = stmt.query_map(params![index_key, min_score, max_score], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (member, score, fields_json) = row?;
                let fields = match fields_json {
                    Some(json) => serde_json::from_str(&json)?,
                    None => IndexFields::default(),
                };
                entries.push(IndexEntry {
                    member,
                    score,
                    fields,
                });
            }
            Ok(entries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{merge_add_counts, IndexChange};
    use tempfile::tempdir;

    fn changes(items: &[(&str, i64, i64)]) -> IndexChanges {
        items
            .iter()
            .map(|(member, score, count)| {
                (
                    member.to_string(),
                    IndexChange {
                        score: *score,
                        fields: IndexFields::count(*count),
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_double_upsert_doubles_counts() {
        let dir = tempdir().unwrap();
        let index = SqliteSortedIndex::new(Arc::new(IndexDb::new(dir.path().join("i.db"), true)));
        let batch = changes(&[("k:result:a", 10, 1), ("k:result:b", 20, 2)]);

        let first = index.upsert("k", &batch, &merge_add_counts).await.unwrap();
        assert_eq!(first, UpsertStats { inserted: 2, merged: 0 });
        let second = index.upsert("k", &batch, &merge_add_counts).await.unwrap();
        assert_eq!(second, UpsertStats { inserted: 0, merged: 2 });

        let entries = index.range_query("k", 0, 100).await.unwrap();
        let counts: Vec<(&str, i64)> = entries
            .iter()
            .map(|e| (e.member.as_str(), e.fields.count))
            .collect();
        assert_eq!(counts, vec![("k:result:a", 2), ("k:result:b", 4)]);
    }

    #[tokio::test]
    async fn test_score_set_once() {
        let dir = tempdir().unwrap();
        let index = SqliteSortedIndex::new(Arc::new(IndexDb::new(dir.path().join("i.db"), false)));

        index
            .upsert("k", &changes(&[("m", 10, 1)]), &merge_add_counts)
            .await
            .unwrap();
        index
            .upsert("k", &changes(&[("m", 99, 1)]), &merge_add_counts)
            .await
            .unwrap();

        let entries = index.range_query("k", 0, 1_000).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].score, 10);
        assert_eq!(entries[0].fields.count, 2);
        assert!(index.range_query("k", 50, 1_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pointer_without_fields_reads_as_zero() {
        let dir = tempdir().unwrap();
        let db = Arc::new(IndexDb::new(dir.path().join("i.db"), true));
        // pointer written, fields step never ran
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sorted_index (index_key, member, score) VALUES ('k', 'orphan', 5)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let index = SqliteSortedIndex::new(db);
        let entries = index.range_query("k", 0, 10).await.unwrap();
        assert_eq!(entries[0].fields, IndexFields::default());

        // a later upsert merges against zero
        index
            .upsert("k", &changes(&[("orphan", 5, 3)]), &merge_add_counts)
            .await
            .unwrap();
        let entries = index.range_query("k", 0, 10).await.unwrap();
        assert_eq!(entries[0].fields.count, 3);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let dir = tempdir().unwrap();
        let index = SqliteSortedIndex::new(Arc::new(IndexDb::new(dir.path().join("i.db"), true)));
        index
            .upsert("a", &changes(&[("m", 1, 1)]), &merge_add_counts)
            .await
            .unwrap();
        index
            .upsert("b", &changes(&[("m", 1, 5)]), &merge_add_counts)
            .await
            .unwrap();
        assert_eq!(index.range_query("a", 0, 10).await.unwrap()[0].fields.count, 1);
        assert_eq!(index.range_query("b", 0, 10).await.unwrap()[0].fields.count, 5);
    }
}
