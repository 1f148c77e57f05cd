//! Aggregation query engine
//!
//! Wraps `EventStore::group_reduce` with the rules incremental jobs depend on:
//! the query is narrowed to `id > cursor`, sorted by ascending id (the order
//! that decides which id was "last processed"), and bounded by a chunk size
//! counted in raw events, not groups.

use super::{AggregationStrategy, GroupValue};
use crate::error::StoreResult;
use crate::event::{EventQuery, EventStore, Filter, SortOrder};
use crate::id::SortableId;
use crate::partition::Granularity;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One bounded aggregation pass
#[derive(Debug, Clone)]
pub struct AggregationRequest {
    /// Equality/range conditions (parser, time range, attributes)
    pub filter: Filter,
    /// Only events strictly after this id are considered
    pub cursor: Option<SortableId>,
    /// Raw events scanned at most
    pub limit: usize,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationOutput {
    pub groups: BTreeMap<String, GroupValue>,
    pub scanned: usize,
    /// Max id over every scanned event, mapped or not
    pub last_event_id: Option<SortableId>,
}

impl AggregationOutput {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

pub struct AggregationQueryEngine {
    store: Arc<dyn EventStore>,
}

impl AggregationQueryEngine {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Execute `strategy` over the next slice of events.
    ///
    /// Store errors propagate unchanged. The scratch space used for the
    /// map/reduce pass is released before this returns.
    pub async fn run(
        &self,
        request: AggregationRequest,
        strategy: &dyn AggregationStrategy,
    ) -> StoreResult<AggregationOutput> {
        let filter = match request.cursor {
            Some(cursor) => request.filter.after_id(cursor),
            None => request.filter,
        };
        let query = EventQuery::new(filter)
            .sort(SortOrder::IdAsc)
            .limit(request.limit);

        let output = self
            .store
            .group_reduce(&query, strategy, request.granularity)
            .await?;

        let group_max = SortableId::max_of(output.groups.values().filter_map(|v| v.last_event_id));
        if group_max > output.last_scanned_id {
            log::warn!(
                "⚠️  {} group id {:?} is past the last scanned id {:?}",
                strategy.name(),
                group_max,
                output.last_scanned_id
            );
        }
        // events that map to no group still count as processed
        let last_event_id = output.last_scanned_id.max(group_max);

        log::debug!(
            "🔎 {} scanned {} events into {} groups (last id: {})",
            strategy.name(),
            output.scanned,
            output.groups.len(),
            last_event_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string())
        );

        Ok(AggregationOutput {
            groups: output.groups,
            scanned: output.scanned,
            last_event_id,
        })
    }
}
