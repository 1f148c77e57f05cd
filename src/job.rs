//! Partitioned aggregation job
//!
//! For every (parser, interval) permutation, counts the events after the
//! cursor per time partition and merges the counts into that permutation's
//! sorted index. Permutations run one after another; the chunk's cursor
//! candidate is the max last id over all of them.

use crate::aggregate::{AggregationQueryEngine, AggregationRequest, AggregationStrategy};
use crate::config::ConfigError;
use crate::context::JobContext;
use crate::cursor::CursorStore;
use crate::error::StoreError;
use crate::event::Filter;
use crate::id::SortableId;
use crate::index::{merge_add_counts, IndexChange, IndexChanges, IndexFields, SortedIndexStore, UpsertStats};
use crate::keys;
use crate::partition::{label_score, Granularity, Interval};
use crate::scheduler::ShutdownHandle;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{job} [{permutation}] aggregation failed: {source}")]
    Aggregate {
        job: String,
        permutation: String,
        source: StoreError,
    },

    #[error("{job} [{permutation}] upsert into {index_key} failed: {source}")]
    Upsert {
        job: String,
        permutation: String,
        index_key: String,
        source: StoreError,
    },

    #[error("{job} cursor read {key} failed: {source}")]
    CursorRead {
        job: String,
        key: String,
        source: StoreError,
    },

    #[error("{job} cursor write {key} = {last_id} failed: {source}")]
    CursorWrite {
        job: String,
        key: String,
        last_id: SortableId,
        source: StoreError,
    },
}

/// One independent aggregation stream
#[derive(Debug, Clone, PartialEq)]
pub struct Permutation {
    pub parser: String,
    pub interval: Interval,
    pub granularity: Granularity,
    pub index_key: String,
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}ms/{}", self.parser, self.interval, self.granularity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermutationStats {
    pub permutation: String,
    pub scanned: usize,
    pub groups: usize,
    pub upsert: UpsertStats,
    pub last_event_id: Option<SortableId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    /// Cursor the chunk started from
    pub previous_id: Option<SortableId>,
    /// Max last id over all permutations, or `previous_id` if none had results
    pub chunk_last_id: Option<SortableId>,
    pub permutations: Vec<PermutationStats>,
}

impl ChunkOutcome {
    /// New cursor value, if the chunk moved past `previous_id`
    pub fn progress(&self) -> Option<SortableId> {
        match (self.chunk_last_id, self.previous_id) {
            (Some(last), Some(previous)) if last <= previous => None,
            (last, _) => last,
        }
    }

    pub fn scanned(&self) -> usize {
        self.permutations.iter().map(|p| p.scanned).sum()
    }
}

pub struct PartitionedAggregationJob {
    strategy: Arc<dyn AggregationStrategy>,
    engine: AggregationQueryEngine,
    index: Arc<dyn SortedIndexStore>,
    cursors: Arc<dyn CursorStore>,
    permutations: Vec<Permutation>,
    cursor_key: String,
    chunk_size: usize,
    job_wait: Duration,
}

impl PartitionedAggregationJob {
    /// Enumerate permutations from the context's parsers and intervals,
    /// honoring a parser and/or interval restriction.
    pub fn new(ctx: &JobContext, strategy: Arc<dyn AggregationStrategy>) -> Result<Self, ConfigError> {
        let config = &ctx.config;
        let parsers = match &config.only_parser {
            Some(name) => ctx.parsers.restrict(name)?,
            None => ctx.parsers.clone(),
        };
        let intervals = match config.only_interval {
            Some(interval) => vec![interval],
            None => config.intervals.clone(),
        };
        if parsers.list_configured_parsers().is_empty() {
            return Err(ConfigError::Empty("parsers".to_string()));
        }
        if intervals.is_empty() {
            return Err(ConfigError::Empty("intervals".to_string()));
        }

        let job_name = strategy.name();
        let mut permutations = Vec::new();
        for parser in parsers.list_configured_parsers() {
            for interval in &intervals {
                permutations.push(Permutation {
                    parser: parser.clone(),
                    interval: *interval,
                    granularity: strategy.partition_granularity(*interval),
                    index_key: keys::index_key(&config.namespace, job_name, Some(parser), Some(*interval)),
                });
            }
        }

        let cursor_key = keys::cursor_key(
            &config.namespace,
            job_name,
            config.only_parser.as_deref(),
            config.only_interval,
        );

        Ok(Self {
            engine: AggregationQueryEngine::new(ctx.events.clone()),
            index: ctx.index.clone(),
            cursors: ctx.cursors.clone(),
            strategy,
            permutations,
            cursor_key,
            chunk_size: config.chunk_size,
            job_wait: config.job_wait,
        })
    }

    pub fn name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn permutations(&self) -> &[Permutation] {
        &self.permutations
    }

    pub fn cursor_key(&self) -> &str {
        &self.cursor_key
    }

    pub async fn read_cursor(&self) -> Result<Option<SortableId>, JobError> {
        self.cursors
            .read(&self.cursor_key)
            .await
            .map_err(|source| JobError::CursorRead {
                job: self.name().to_string(),
                key: self.cursor_key.clone(),
                source,
            })
    }

    pub async fn write_cursor(&self, last_id: SortableId) -> Result<(), JobError> {
        self.cursors
            .write(&self.cursor_key, last_id)
            .await
            .map_err(|source| JobError::CursorWrite {
                job: self.name().to_string(),
                key: self.cursor_key.clone(),
                last_id,
                source,
            })?;
        log::debug!("💾 {} cursor {} = {}", self.name(), self.cursor_key, last_id);
        Ok(())
    }

    /// Run every permutation once, starting after `last_id`.
    ///
    /// The first failing permutation aborts the chunk; the cursor is not
    /// touched here. A shutdown request only skips the inter-job delay.
    pub async fn run_chunk(
        &self,
        last_id: Option<SortableId>,
        shutdown: &ShutdownHandle,
    ) -> Result<ChunkOutcome, JobError> {
        let mut stats = Vec::with_capacity(self.permutations.len());

        for (idx, permutation) in self.permutations.iter().enumerate() {
            if idx > 0 && !self.job_wait.is_zero() {
                shutdown.sleep(self.job_wait).await;
            }
            stats.push(self.run_permutation(permutation, last_id).await?);
        }

        let chunk_last_id = SortableId::max_of(stats.iter().filter_map(|s| s.last_event_id)).or(last_id);
        let outcome = ChunkOutcome {
            previous_id: last_id,
            chunk_last_id,
            permutations: stats,
        };

        log::info!(
            "📊 {} chunk: scanned {} events across {} permutation(s), cursor {} -> {}",
            self.name(),
            outcome.scanned(),
            outcome.permutations.len(),
            display_id(last_id),
            display_id(outcome.chunk_last_id)
        );
        Ok(outcome)
    }

    async fn run_permutation(
        &self,
        permutation: &Permutation,
        last_id: Option<SortableId>,
    ) -> Result<PermutationStats, JobError> {
        let request = AggregationRequest {
            filter: Filter::new().eq("parser", permutation.parser.as_str()),
            cursor: last_id,
            limit: self.chunk_size,
            granularity: permutation.granularity,
        };

        let output = self
            .engine
            .run(request, self.strategy.as_ref())
            .await
            .map_err(|source| JobError::Aggregate {
                job: self.name().to_string(),
                permutation: permutation.to_string(),
                source,
            })?;

        let mut changes = IndexChanges::new();
        for (label, value) in &output.groups {
            let Some(score) = label_score(label) else {
                log::warn!(
                    "⚠️  {} [{}] skipping group with unparseable label {:?}",
                    self.name(),
                    permutation,
                    label
                );
                continue;
            };
            changes.insert(
                keys::member(&permutation.index_key, label),
                IndexChange {
                    score,
                    fields: IndexFields::count(value.count),
                },
            );
        }

        let upsert = if changes.is_empty() {
            UpsertStats::default()
        } else {
            self.index
                .upsert(&permutation.index_key, &changes, &merge_add_counts)
                .await
                .map_err(|source| JobError::Upsert {
                    job: self.name().to_string(),
                    permutation: permutation.to_string(),
                    index_key: permutation.index_key.clone(),
                    source,
                })?
        };

        log::debug!(
            "   ├─ {} [{}] {} events -> {} partitions ({} new, {} merged) into {}",
            self.name(),
            permutation,
            output.scanned,
            output.groups.len(),
            upsert.inserted,
            upsert.merged,
            permutation.index_key
        );

        Ok(PermutationStats {
            permutation: permutation.to_string(),
            scanned: output.scanned,
            groups: output.groups.len(),
            upsert,
            last_event_id: output.last_event_id,
        })
    }
}

fn display_id(id: Option<SortableId>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CountAllPartitioned;
    use crate::config::JobConfig;
    use tempfile::tempdir;

    fn context(dir: &tempfile::TempDir, config: JobConfig) -> JobContext {
        JobContext::open(JobConfig {
            db_path: dir.path().join("events.db"),
            index_db_path: dir.path().join("index.db"),
            ..config
        })
        .unwrap()
    }

    #[test]
    fn test_permutations_cross_parsers_and_intervals() {
        let dir = tempdir().unwrap();
        let ctx = context(
            &dir,
            JobConfig {
                parsers: vec!["Json".to_string(), "Syslog".to_string()],
                intervals: vec!["1h".parse().unwrap(), "30d".parse().unwrap()],
                ..JobConfig::default()
            },
        );
        let job = PartitionedAggregationJob::new(&ctx, Arc::new(CountAllPartitioned)).unwrap();

        let perms: Vec<(&str, Granularity)> = job
            .permutations()
            .iter()
            .map(|p| (p.parser.as_str(), p.granularity))
            .collect();
        assert_eq!(
            perms,
            vec![
                ("Json", Granularity::Minute),
                ("Json", Granularity::Day),
                ("Syslog", Granularity::Minute),
                ("Syslog", Granularity::Day),
            ]
        );
        assert_eq!(job.permutations()[0].index_key, "mainevent:CountAllPartitioned:Json_3600000");
        assert_eq!(job.cursor_key(), "mainevent:CountAllPartitioned");
    }

    #[test]
    fn test_restriction_narrows_permutations_and_cursor() {
        let dir = tempdir().unwrap();
        let ctx = context(
            &dir,
            JobConfig {
                parsers: vec!["Json".to_string(), "Syslog".to_string()],
                only_parser: Some("Syslog".to_string()),
                only_interval: Some("1d".parse().unwrap()),
                ..JobConfig::default()
            },
        );
        let job = PartitionedAggregationJob::new(&ctx, Arc::new(CountAllPartitioned)).unwrap();
        assert_eq!(job.permutations().len(), 1);
        assert_eq!(job.permutations()[0].granularity, Granularity::Hour);
        assert_eq!(job.cursor_key(), "mainevent:CountAllPartitioned:Syslog_86400000");

        let ctx = context(
            &dir,
            JobConfig {
                only_parser: Some("Apache".to_string()),
                ..JobConfig::default()
            },
        );
        assert!(matches!(
            PartitionedAggregationJob::new(&ctx, Arc::new(CountAllPartitioned)),
            Err(ConfigError::UnknownParser(_))
        ));
    }

    #[test]
    fn test_progress_detection() {
        let a = SortableId::new(1, [0; 5], 0);
        let b = SortableId::new(2, [0; 5], 0);
        let outcome = |previous_id, chunk_last_id| ChunkOutcome {
            previous_id,
            chunk_last_id,
            permutations: Vec::new(),
        };
        assert_eq!(outcome(None, None).progress(), None);
        assert_eq!(outcome(None, Some(a)).progress(), Some(a));
        assert_eq!(outcome(Some(a), Some(a)).progress(), None);
        assert_eq!(outcome(Some(a), Some(b)).progress(), Some(b));
        // never move backwards
        assert_eq!(outcome(Some(b), Some(a)).progress(), None);
    }
}
