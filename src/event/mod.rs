//! Append-only event store
//!
//! Events are immutable once written. The aggregation pipeline only reads
//! them, through bounded, filtered, sorted slices.

pub mod filter;
pub mod store;

pub use filter::{Comparison, Condition, EventQuery, Filter, SortOrder};
pub use store::{EventStore, GroupReduceOutput, SqliteEventStore};

use crate::id::SortableId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A persisted log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned by the store at insert time
    pub id: SortableId,
    /// Canonical timestamp, UTC milliseconds
    pub time: i64,
    /// Name of the parser that produced the record
    pub parser: String,
    /// Parser-specific attributes
    pub attrs: Map<String, Value>,
}

/// An event waiting to be appended (no id yet)
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub time: i64,
    pub parser: String,
    pub attrs: Map<String, Value>,
}

impl NewEvent {
    pub fn new(parser: impl Into<String>, time: i64) -> Self {
        Self {
            time,
            parser: parser.into(),
            attrs: Map::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}
