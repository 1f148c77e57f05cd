//! Job configuration from environment variables
//!
//! Loaded once at startup (after `dotenv`), then overridden by CLI flags.

use crate::id::SortableId;
use crate::partition::Interval;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("{0} must not be empty")]
    Empty(String),

    #[error("Parser {0:?} is not configured")]
    UnknownParser(String),
}

/// Configuration for the aggregation job
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Event store database
    pub db_path: PathBuf,

    /// Sorted index + cursor database
    pub index_db_path: PathBuf,

    pub namespace: String,

    /// Configured parser names, in permutation order
    pub parsers: Vec<String>,

    pub intervals: Vec<Interval>,

    /// Events scanned per permutation per chunk
    pub chunk_size: usize,

    /// Delay between permutations
    pub job_wait: Duration,

    /// Delay between chunks that made progress
    pub chunk_wait: Duration,

    /// Backoff once caught up (or after a failed chunk)
    pub idle_wait: Duration,

    /// Keep the index connection open across calls
    pub index_bulk: bool,

    /// Cursor override for the first chunk
    pub start_id: Option<SortableId>,

    pub only_parser: Option<String>,
    pub only_interval: Option<Interval>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/mainevent.db"),
            index_db_path: PathBuf::from("data/mainevent-index.db"),
            namespace: "mainevent".to_string(),
            parsers: vec!["Json".to_string()],
            intervals: default_intervals(),
            chunk_size: 500,
            job_wait: Duration::from_secs(1),
            chunk_wait: Duration::from_secs(1),
            idle_wait: Duration::from_secs(60),
            index_bulk: true,
            start_id: None,
            only_parser: None,
            only_interval: None,
        }
    }
}

fn default_intervals() -> Vec<Interval> {
    [1, 24, 7 * 24, 30 * 24, 365 * 24]
        .iter()
        .map(|hours| Interval::from_millis(hours * 3_600_000))
        .collect()
}

impl JobConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `MAINEVENT_DB_PATH` (default: data/mainevent.db)
    /// - `MAINEVENT_INDEX_DB_PATH` (default: data/mainevent-index.db)
    /// - `MAINEVENT_NAMESPACE` (default: mainevent)
    /// - `MAINEVENT_PARSERS` (default: Json)
    /// - `MAINEVENT_INTERVALS` (default: 1h,1d,7d,30d,365d)
    /// - `MAINEVENT_CHUNK_SIZE` (default: 500)
    /// - `MAINEVENT_JOB_WAIT_SECS` (default: 1)
    /// - `MAINEVENT_CHUNK_WAIT_SECS` (default: 1)
    /// - `MAINEVENT_IDLE_WAIT_SECS` (default: 60)
    /// - `MAINEVENT_INDEX_BULK` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("MAINEVENT_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("MAINEVENT_INDEX_DB_PATH") {
            config.index_db_path = PathBuf::from(path);
        }
        if let Some(namespace) = lookup("MAINEVENT_NAMESPACE") {
            let namespace = namespace.trim().to_string();
            if namespace.is_empty() {
                return Err(ConfigError::Empty("MAINEVENT_NAMESPACE".to_string()));
            }
            config.namespace = namespace;
        }
        if let Some(raw) = lookup("MAINEVENT_PARSERS") {
            config.parsers = split_list(&raw);
            if config.parsers.is_empty() {
                return Err(ConfigError::Empty("MAINEVENT_PARSERS".to_string()));
            }
        }
        if let Some(raw) = lookup("MAINEVENT_INTERVALS") {
            config.intervals = split_list(&raw)
                .iter()
                .map(|item| parse_var::<Interval>("MAINEVENT_INTERVALS", item))
                .collect::<Result<_, _>>()?;
            if config.intervals.is_empty() {
                return Err(ConfigError::Empty("MAINEVENT_INTERVALS".to_string()));
            }
        }
        if let Some(raw) = lookup("MAINEVENT_CHUNK_SIZE") {
            config.chunk_size = parse_var("MAINEVENT_CHUNK_SIZE", &raw)?;
            if config.chunk_size == 0 {
                return Err(invalid("MAINEVENT_CHUNK_SIZE", &raw, "must be positive"));
            }
        }
        if let Some(raw) = lookup("MAINEVENT_JOB_WAIT_SECS") {
            config.job_wait = Duration::from_secs(parse_var("MAINEVENT_JOB_WAIT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("MAINEVENT_CHUNK_WAIT_SECS") {
            config.chunk_wait = Duration::from_secs(parse_var("MAINEVENT_CHUNK_WAIT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("MAINEVENT_IDLE_WAIT_SECS") {
            config.idle_wait = Duration::from_secs(parse_var("MAINEVENT_IDLE_WAIT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("MAINEVENT_INDEX_BULK") {
            config.index_bulk = parse_var("MAINEVENT_INDEX_BULK", &raw)?;
        }

        Ok(config)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_var<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, raw, &e.to_string()))
}

fn invalid(var: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = JobConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, JobConfig::default());
        assert_eq!(config.namespace, "mainevent");
        assert_eq!(config.parsers, vec!["Json".to_string()]);
        assert_eq!(config.intervals.len(), 5);
        assert_eq!(config.intervals[0].as_millis(), 3_600_000);
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.idle_wait, Duration::from_secs(60));
        assert!(config.index_bulk);
    }

    #[test]
    fn test_custom_config() {
        let config = JobConfig::from_lookup(lookup(&[
            ("MAINEVENT_DB_PATH", "/tmp/events.db"),
            ("MAINEVENT_NAMESPACE", "staging"),
            ("MAINEVENT_PARSERS", "Json, Syslog,,"),
            ("MAINEVENT_INTERVALS", "15m,3600000"),
            ("MAINEVENT_CHUNK_SIZE", "50"),
            ("MAINEVENT_JOB_WAIT_SECS", "0"),
            ("MAINEVENT_INDEX_BULK", "false"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/events.db"));
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.parsers, vec!["Json".to_string(), "Syslog".to_string()]);
        assert_eq!(
            config.intervals,
            vec![Interval::from_millis(900_000), Interval::from_millis(3_600_000)]
        );
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.job_wait, Duration::ZERO);
        assert!(!config.index_bulk);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = JobConfig::from_lookup(lookup(&[("MAINEVENT_CHUNK_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "MAINEVENT_CHUNK_SIZE"));

        let err = JobConfig::from_lookup(lookup(&[("MAINEVENT_CHUNK_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = JobConfig::from_lookup(lookup(&[("MAINEVENT_INTERVALS", "1h,2w")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = JobConfig::from_lookup(lookup(&[("MAINEVENT_INTERVALS", "300000000000d")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "MAINEVENT_INTERVALS"));

        let err = JobConfig::from_lookup(lookup(&[("MAINEVENT_PARSERS", " , ")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty("MAINEVENT_PARSERS".to_string()));
    }
}
