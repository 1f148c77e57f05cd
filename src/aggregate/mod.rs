//! Map/reduce aggregation over bounded slices of the event store
//!
//! ```text
//! EventQuery (filter + id ASC + limit)
//!     ↓
//! EventStore::group_reduce  →  map(event) → (group_key, GroupValue)
//!     ↓                        reduce(group_key, partials) → GroupValue
//! AggregationQueryEngine   →  groups + max id over every scanned event
//! ```

pub mod engine;
pub mod strategy;

pub use engine::{AggregationOutput, AggregationQueryEngine, AggregationRequest};
pub use strategy::{AggregationStrategy, CountAllPartitioned, CountByParser};

use crate::id::SortableId;
use serde::{Deserialize, Serialize};

/// Partial or reduced value for one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GroupValue {
    pub count: i64,
    /// Highest event id that contributed to this group
    pub last_event_id: Option<SortableId>,
}

impl GroupValue {
    pub fn single(id: SortableId) -> Self {
        Self {
            count: 1,
            last_event_id: Some(id),
        }
    }
}
