//! Command-line surface of the `aggregate_job` binary

use crate::config::{ConfigError, JobConfig};
use crate::id::SortableId;
use crate::partition::Interval;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Default, PartialEq)]
#[command(name = "aggregate_job", version)]
#[command(
    about = "Incremental partitioned aggregation of stored log events",
    long_about = "Repeatedly counts new events per time partition for every configured parser and interval, merges the counts into the sorted index, and records progress so restarts resume where they stopped."
)]
#[command(after_long_help = "Examples:
  aggregate_job
  aggregate_job --limit 1000 --chunk-wait 0
  aggregate_job --parser Json --interval 1h
  aggregate_job --id 49b4e1c50102030405000001 --verbose")]
pub struct JobArgs {
    #[arg(long, value_name = "N", help = "Events scanned per permutation per chunk")]
    pub limit: Option<usize>,

    #[arg(long, value_name = "HEX_ID", help = "Start after this event id instead of the stored cursor")]
    pub id: Option<SortableId>,

    #[arg(long, value_name = "SECS", help = "Delay between parser/interval permutations")]
    pub job_wait: Option<u64>,

    #[arg(long, value_name = "SECS", help = "Delay between chunks that made progress")]
    pub chunk_wait: Option<u64>,

    #[arg(long, value_name = "SECS", help = "Backoff when no new events are found")]
    pub idle_wait: Option<u64>,

    #[arg(long, value_name = "NAME", help = "Only aggregate events from this parser")]
    pub parser: Option<String>,

    #[arg(long, value_name = "SPEC", help = "Only aggregate this interval (ms or 15m, 1h, 7d)")]
    pub interval: Option<Interval>,

    #[arg(long, value_name = "PATH", help = "Event store database")]
    pub db: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Sorted index and cursor database")]
    pub index_db: Option<PathBuf>,

    #[arg(long, value_name = "NS", help = "Key namespace")]
    pub namespace: Option<String>,

    #[arg(short, long, conflicts_with = "verbose", help = "Only log warnings and errors")]
    pub quiet: bool,

    #[arg(short, long, help = "Log chunk-level detail")]
    pub verbose: bool,
}

impl JobArgs {
    /// Log filter implied by `--quiet` / `--verbose`
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Override `config` with the flags that were given
    pub fn apply(self, mut config: JobConfig) -> Result<JobConfig, ConfigError> {
        if let Some(limit) = self.limit {
            if limit == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "--limit".to_string(),
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            config.chunk_size = limit;
        }
        if let Some(secs) = self.job_wait {
            config.job_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = self.chunk_wait {
            config.chunk_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = self.idle_wait {
            config.idle_wait = Duration::from_secs(secs);
        }
        if let Some(path) = self.db {
            config.db_path = path;
        }
        if let Some(path) = self.index_db {
            config.index_db_path = path;
        }
        if let Some(namespace) = self.namespace {
            let namespace = namespace.trim().to_string();
            if namespace.is_empty() {
                return Err(ConfigError::Empty("--namespace".to_string()));
            }
            config.namespace = namespace;
        }
        config.start_id = self.id.or(config.start_id);
        config.only_parser = self.parser.or(config.only_parser);
        config.only_interval = self.interval.or(config.only_interval);
        Ok(config)
    }
}
