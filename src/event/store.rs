//! SQLite-backed event store
//!
//! Events live in a single `events` table. Ids are assigned at insert time
//! by a `SortableIdGenerator` and stored as hex text, so `ORDER BY id` and
//! `id > ?` follow the sortable id order.

use super::filter::EventQuery;
use super::{Event, NewEvent};
use crate::aggregate::{AggregationStrategy, GroupValue};
use crate::error::{StoreError, StoreResult};
use crate::id::{SortableId, SortableIdGenerator};
use crate::partition::Granularity;
use crate::sqlite_pragma::open_connection;
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of a grouped map/reduce pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupReduceOutput {
    pub groups: BTreeMap<String, GroupValue>,
    /// Raw events read from the store (bounded by the query limit)
    pub scanned: usize,
    /// Highest id read, whether or not `map` produced a group for it
    pub last_scanned_id: Option<SortableId>,
}

/// Operations the aggregation pipeline needs from the event store
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event and return its assigned id
    async fn append(&self, event: NewEvent) -> StoreResult<SortableId>;

    /// Append several events in one transaction
    async fn append_batch(&self, events: Vec<NewEvent>) -> StoreResult<Vec<SortableId>>;

    /// Filtered, sorted, size-bounded read
    async fn bulk_query(&self, query: &EventQuery) -> StoreResult<Vec<Event>>;

    /// Run `strategy` over the events selected by `query`.
    ///
    /// Zero matches yields an empty group map, not an error.
    async fn group_reduce(
        &self,
        query: &EventQuery,
        strategy: &dyn AggregationStrategy,
        granularity: Granularity,
    ) -> StoreResult<GroupReduceOutput>;
}

pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
    ids: Mutex<SortableIdGenerator>,
    scratch_seq: AtomicU64,
}

impl SqliteEventStore {
    /// Open (or create) the event database and its schema
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = open_connection(db_path.as_ref())?;
        Self::migrate(&conn)?;

        log::info!("✅ Event store ready: {}", db_path.as_ref().display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ids: Mutex::new(SortableIdGenerator::new()),
            scratch_seq: AtomicU64::new(0),
        })
    }

    /// Use a fixed id generator (deterministic writer identity)
    pub fn with_generator(self, generator: SortableIdGenerator) -> Self {
        Self {
            ids: Mutex::new(generator),
            ..self
        }
    }

    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                time INTEGER NOT NULL,
                parser TEXT NOT NULL,
                attrs_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_parser_id ON events(parser, id);
            CREATE INDEX IF NOT EXISTS idx_events_time ON events(time);
            ",
        )
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn next_id(&self) -> StoreResult<SortableId> {
        let mut ids = self.ids.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(ids.next_id())
    }

    fn select_sql(query: &EventQuery) -> StoreResult<(String, Vec<rusqlite::types::Value>)> {
        let (where_sql, params) = query.filter.to_sql()?;
        let mut sql = format!(
            "SELECT id, time, parser, attrs_json FROM events WHERE {} ORDER BY {}",
            where_sql,
            query.sort.sql()
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok((sql, params))
    }
}

fn event_from_row(row: &Row<'_>) -> StoreResult<Event> {
    let id: String = row.get(0)?;
    let attrs_json: String = row.get(3)?;
    Ok(Event {
        id: id.parse()?,
        time: row.get(1)?,
        parser: row.get(2)?,
        attrs: serde_json::from_str(&attrs_json)?,
    })
}

/// TEMP table holding mapped `(group_key, value)` pairs for one pass.
///
/// Dropped when the guard goes out of scope, on success and on error, so no
/// intermediate rows outlive the call that produced them.
struct ScratchTable<'c> {
    conn: &'c Connection,
    name: String,
}

impl<'c> ScratchTable<'c> {
    fn create(conn: &'c Connection, name: String) -> rusqlite::Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TEMP TABLE {} (group_key TEXT NOT NULL, value_json TEXT NOT NULL)",
            name
        ))?;
        Ok(Self { conn, name })
    }
}

impl Drop for ScratchTable<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .conn
            .execute_batch(&format!("DROP TABLE IF EXISTS temp.{}", self.name))
        {
            log::warn!("⚠️  Failed to drop scratch table {}: {}", self.name, e);
        }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, event: NewEvent) -> StoreResult<SortableId> {
        let mut ids = self.append_batch(vec![event]).await?;
        ids.pop()
            .ok_or_else(|| StoreError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    async fn append_batch(&self, events: Vec<NewEvent>) -> StoreResult<Vec<SortableId>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut assigned = Vec::with_capacity(events.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (id, time, parser, attrs_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for event in &events {
                let id = self.next_id()?;
                stmt.execute(params![
                    id.to_string(),
                    event.time,
                    event.parser,
                    serde_json::to_string(&event.attrs)?,
                ])?;
                assigned.push(id);
            }
        }

        tx.commit()?;
        log::debug!("📥 Appended {} events", assigned.len());
        Ok(assigned)
    }

    async fn bulk_query(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let conn = self.lock()?;
        let (sql, params) = Self::select_sql(query)?;

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(event_from_row(row)?);
        }
        Ok(events)
    }

    async fn group_reduce(
        &self,
        query: &EventQuery,
        strategy: &dyn AggregationStrategy,
        granularity: Granularity,
    ) -> StoreResult<GroupReduceOutput> {
        let conn = self.lock()?;
        let (sql, params) = Self::select_sql(query)?;

        let seq = self.scratch_seq.fetch_add(1, Ordering::Relaxed);
        let scratch = ScratchTable::create(&conn, format!("mr_scratch_{}", seq))?;

        // map
        let mut scanned = 0usize;
        let mut last_scanned_id: Option<SortableId> = None;
        {
            let mut select = conn.prepare(&sql)?;
            let mut insert = conn.prepare(&format!(
                "INSERT INTO temp.{} (group_key, value_json) VALUES (?1, ?2)",
                scratch.name
            ))?;
            let mut rows = select.query(params_from_iter(params.iter()))?;
            while let Some(row) = rows.next()? {
                let event = event_from_row(row)?;
                scanned += 1;
                last_scanned_id = last_scanned_id.max(Some(event.id));
                if let Some((key, value)) = strategy.map(&event, granularity) {
                    insert.execute(params![key, serde_json::to_string(&value)?])?;
                }
            }
        }

        // reduce
        let mut partials: BTreeMap<String, Vec<GroupValue>> = BTreeMap::new();
        {
            let mut stmt = conn.prepare(&format!(
                "SELECT group_key, value_json FROM temp.{} ORDER BY group_key",
                scratch.name
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let value_json: String = row.get(1)?;
                partials
                    .entry(key)
                    .or_default()
                    .push(serde_json::from_str(&value_json)?);
            }
        }

        let groups = partials
            .into_iter()
            .map(|(key, values)| {
                let reduced = strategy.reduce(&key, values);
                (key, reduced)
            })
            .collect();

        drop(scratch);
        Ok(GroupReduceOutput {
            groups,
            scanned,
            last_scanned_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CountByParser;
    use crate::event::{Filter, SortOrder};
    use tempfile::tempdir;

    async fn seeded_store(dir: &tempfile::TempDir) -> SqliteEventStore {
        let store = SqliteEventStore::open(dir.path().join("events.db")).unwrap();
        store
            .append_batch(vec![
                NewEvent::new("Json", 3_000).with_attr("level", "info"),
                NewEvent::new("Nginx", 1_000).with_attr("status", 200),
                NewEvent::new("Json", 2_000).with_attr("level", "error"),
                NewEvent::new("Nginx", 4_000).with_attr("status", 500),
            ])
            .await
            .unwrap();
        store
    }

    fn temp_table_count(store: &SqliteEventStore) -> i64 {
        let conn = store.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_temp_master WHERE type = 'table'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let dir = tempdir().unwrap();
        let store = SqliteEventStore::open(dir.path().join("events.db")).unwrap();
        let ids = store
            .append_batch(vec![NewEvent::new("Json", 1), NewEvent::new("Json", 2)])
            .await
            .unwrap();
        let third = store.append(NewEvent::new("Json", 3)).await.unwrap();
        assert!(ids[0] < ids[1]);
        assert!(ids[1] < third);
    }

    #[tokio::test]
    async fn test_bulk_query_filter_sort_limit() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir).await;

        let json_by_time = store
            .bulk_query(&EventQuery::new(Filter::new().eq("parser", "Json")).sort(SortOrder::TimeAsc))
            .await
            .unwrap();
        assert_eq!(json_by_time.len(), 2);
        assert_eq!(json_by_time[0].time, 2_000);
        assert_eq!(json_by_time[1].attrs["level"], "info");

        let errors = store
            .bulk_query(&EventQuery::new(Filter::new().gte("status", 500)))
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].time, 4_000);

        let newest = store
            .bulk_query(&EventQuery::new(Filter::new()).sort(SortOrder::IdDesc).limit(1))
            .await
            .unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].parser, "Nginx");
        assert_eq!(newest[0].time, 4_000);
    }

    #[tokio::test]
    async fn test_after_id_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let all = store.bulk_query(&EventQuery::default()).await.unwrap();
        let after = store
            .bulk_query(&EventQuery::new(Filter::new().after_id(all[1].id)))
            .await
            .unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id, all[2].id);
    }

    #[tokio::test]
    async fn test_group_reduce_drops_scratch() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir).await;

        let output = store
            .group_reduce(&EventQuery::default(), &CountByParser, Granularity::Hour)
            .await
            .unwrap();
        assert_eq!(output.scanned, 4);
        let all = store.bulk_query(&EventQuery::default()).await.unwrap();
        assert_eq!(output.last_scanned_id, Some(all[3].id));
        assert_eq!(output.groups["Json"].count, 2);
        assert_eq!(output.groups["Nginx"].count, 2);
        assert_eq!(temp_table_count(&store), 0);
    }

    #[tokio::test]
    async fn test_group_reduce_no_matches_is_empty() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let output = store
            .group_reduce(
                &EventQuery::new(Filter::new().eq("parser", "Syslog")),
                &CountByParser,
                Granularity::Hour,
            )
            .await
            .unwrap();
        assert!(output.groups.is_empty());
        assert_eq!(output.scanned, 0);
        assert_eq!(output.last_scanned_id, None);
        assert_eq!(temp_table_count(&store), 0);
    }

    #[tokio::test]
    async fn test_group_reduce_error_still_drops_scratch() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir).await;
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO events (id, time, parser, attrs_json) VALUES ('ffffffffffffffffffffffff', 5, 'Json', 'not json')",
                [],
            )
            .unwrap();
        }
        let result = store
            .group_reduce(&EventQuery::default(), &CountByParser, Granularity::Hour)
            .await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
        assert_eq!(temp_table_count(&store), 0);
    }
}
