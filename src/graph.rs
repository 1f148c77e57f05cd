//! Read side: graph points from the sorted index

use crate::error::StoreResult;
use crate::index::SortedIndexStore;
use crate::keys;
use crate::partition::Interval;
use serde::Serialize;

/// Window around "now" within which graph responses are cached briefly
const FRESH_WINDOW_MS: u64 = 60_000;
const FRESH_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPoint {
    pub label: String,
    /// Partition start, UTC millis
    pub score: i64,
    pub count: i64,
}

/// Points for one permutation over `[end_time - interval, end_time]`.
///
/// Entries written without fields read as count 0.
pub async fn read_graph(
    index: &dyn SortedIndexStore,
    namespace: &str,
    job_name: &str,
    parser: &str,
    interval: Interval,
    end_time: i64,
) -> StoreResult<Vec<GraphPoint>> {
    let index_key = keys::index_key(namespace, job_name, Some(parser), Some(interval));
    let span = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
    let start_time = end_time.saturating_sub(span);
    let entries = index.range_query(&index_key, start_time, end_time).await?;

    Ok(entries
        .into_iter()
        .map(|entry| GraphPoint {
            label: keys::member_label(&index_key, &entry.member)
                .unwrap_or(entry.member.as_str())
                .to_string(),
            score: entry.score,
            count: entry.fields.count,
        })
        .collect())
}

/// Cache TTL for a graph ending at `end_time`: 60s when the window ends
/// within a minute of `now`, otherwise no expiry.
pub fn cache_ttl_secs(now: i64, end_time: i64) -> Option<u64> {
    if now.abs_diff(end_time) <= FRESH_WINDOW_MS {
        Some(FRESH_TTL_SECS)
    } else {
        None
    }
}
