//! Score-ordered index of aggregate results
//!
//! Each index key holds a set of `(member, score)` pointers plus a field
//! record per member. Writers merge into existing members through a
//! caller-supplied function instead of overwriting them.

pub mod connection;
pub mod sqlite;

pub use connection::IndexDb;
pub use sqlite::SqliteSortedIndex;

use crate::error::StoreResult;
use crate::id::SortableId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate values stored per member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFields {
    #[serde(default)]
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<SortableId>,
}

impl IndexFields {
    pub fn count(count: i64) -> Self {
        Self {
            count,
            last_event_id: None,
        }
    }
}

/// New score and fields for one member
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexChange {
    pub score: i64,
    pub fields: IndexFields,
}

/// member → change
pub type IndexChanges = BTreeMap<String, IndexChange>;

/// Combines existing fields with incoming fields for a member already present
pub type MergeFn = dyn Fn(&IndexFields, &IndexFields) -> IndexFields + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub member: String,
    pub score: i64,
    pub fields: IndexFields,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub merged: usize,
}

/// Additive merge: counts add, the newest event id wins
pub fn merge_add_counts(existing: &IndexFields, new: &IndexFields) -> IndexFields {
    IndexFields {
        count: existing.count + new.count,
        last_event_id: existing.last_event_id.max(new.last_event_id),
    }
}

#[async_trait]
pub trait SortedIndexStore: Send + Sync {
    /// Insert absent members (pointer + fields); merge present members with
    /// `merge`, leaving their score untouched.
    async fn upsert(
        &self,
        index_key: &str,
        changes: &IndexChanges,
        merge: &MergeFn,
    ) -> StoreResult<UpsertStats>;

    /// Members with `min_score <= score <= max_score`, ascending by score.
    ///
    /// A pointer without a field record reads as zeroed fields.
    async fn range_query(
        &self,
        index_key: &str,
        min_score: i64,
        max_score: i64,
    ) -> StoreResult<Vec<IndexEntry>>;
}
