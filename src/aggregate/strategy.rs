//! Grouping policies plugged into the map/reduce engine

use super::GroupValue;
use crate::event::Event;
use crate::partition::{Granularity, Interval};

/// One aggregation job variant.
///
/// `map` returns the group a single event contributes to (or `None` to
/// contribute nothing); `reduce` folds every partial collected for a group.
pub trait AggregationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bucket size used for a sliding window of `interval`
    fn partition_granularity(&self, interval: Interval) -> Granularity {
        Granularity::best_fit(interval)
    }

    fn map(&self, event: &Event, granularity: Granularity) -> Option<(String, GroupValue)>;

    fn reduce(&self, key: &str, partials: Vec<GroupValue>) -> GroupValue;
}

/// Sum counts, keep the highest contributing id
fn sum_counts(partials: Vec<GroupValue>) -> GroupValue {
    partials
        .into_iter()
        .fold(GroupValue::default(), |acc, partial| GroupValue {
            count: acc.count + partial.count,
            last_event_id: acc.last_event_id.max(partial.last_event_id),
        })
}

/// Counts events per time partition (the dashboard graph job)
#[derive(Debug, Default, Clone, Copy)]
pub struct CountAllPartitioned;

impl AggregationStrategy for CountAllPartitioned {
    fn name(&self) -> &'static str {
        "CountAllPartitioned"
    }

    fn map(&self, event: &Event, granularity: Granularity) -> Option<(String, GroupValue)> {
        match granularity.label(event.time) {
            Some(label) => Some((label, GroupValue::single(event.id))),
            None => {
                log::debug!(
                    "⚠️  No {} partition for event {} (time={})",
                    granularity,
                    event.id,
                    event.time
                );
                None
            }
        }
    }

    fn reduce(&self, _key: &str, partials: Vec<GroupValue>) -> GroupValue {
        sum_counts(partials)
    }
}

/// Counts events per producing parser
#[derive(Debug, Default, Clone, Copy)]
pub struct CountByParser;

impl AggregationStrategy for CountByParser {
    fn name(&self) -> &'static str {
        "CountByParser"
    }

    fn map(&self, event: &Event, _granularity: Granularity) -> Option<(String, GroupValue)> {
        Some((event.parser.clone(), GroupValue::single(event.id)))
    }

    fn reduce(&self, _key: &str, partials: Vec<GroupValue>) -> GroupValue {
        sum_counts(partials)
    }
}
