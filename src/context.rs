//! Shared handles passed to the job and the scheduler

use crate::config::JobConfig;
use crate::cursor::{CursorStore, SqliteCursorStore};
use crate::error::StoreResult;
use crate::event::{EventStore, SqliteEventStore};
use crate::index::{IndexDb, SortedIndexStore, SqliteSortedIndex};
use crate::parser::ParserRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct JobContext {
    pub events: Arc<dyn EventStore>,
    pub index: Arc<dyn SortedIndexStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub parsers: ParserRegistry,
    pub config: JobConfig,
}

impl JobContext {
    pub fn new(
        events: Arc<dyn EventStore>,
        index: Arc<dyn SortedIndexStore>,
        cursors: Arc<dyn CursorStore>,
        config: JobConfig,
    ) -> Self {
        let parsers = ParserRegistry::new(config.parsers.iter().cloned());
        Self {
            events,
            index,
            cursors,
            parsers,
            config,
        }
    }

    /// SQLite-backed stores at the configured paths.
    ///
    /// The sorted index and the cursor store share one index database.
    pub fn open(config: JobConfig) -> StoreResult<Self> {
        let events = Arc::new(SqliteEventStore::open(&config.db_path)?);
        let index_db = Arc::new(IndexDb::new(&config.index_db_path, config.index_bulk));
        let index = Arc::new(SqliteSortedIndex::new(index_db.clone()));
        let cursors = Arc::new(SqliteCursorStore::new(index_db));

        log::info!(
            "✅ Index store ready: {} (bulk: {})",
            config.index_db_path.display(),
            config.index_bulk
        );

        Ok(Self::new(events, index, cursors, config))
    }
}
