//! Time partitioning: intervals, granularities and partition labels
//!
//! An interval (e.g. "last 1 hour") picks a granularity through a fixed
//! best-fit table. The granularity floors an event timestamp and renders it
//! as a partition label such as `03/12/2009 10:00:00`. Labels are both the
//! grouping key during aggregation and the member suffix in the sorted index,
//! and parse back into the score used for range queries.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Label layout (always full resolution, floored to the granularity)
pub const LABEL_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    pub fn all() -> [Granularity; 6] {
        [
            Granularity::Year,
            Granularity::Month,
            Granularity::Day,
            Granularity::Hour,
            Granularity::Minute,
            Granularity::Second,
        ]
    }

    /// Best-fit granularity for a sliding window: shorter windows get finer
    /// buckets.
    ///
    /// | interval      | granularity |
    /// |---------------|-------------|
    /// | <= 1 minute   | second      |
    /// | <= 1 hour     | minute      |
    /// | <= 1 day      | hour        |
    /// | <= 31 days    | day         |
    /// | <= 366 days   | month       |
    /// | longer        | year        |
    pub fn best_fit(interval: Interval) -> Granularity {
        let ms = interval.as_millis();
        if ms <= MINUTE_MS {
            Granularity::Second
        } else if ms <= HOUR_MS {
            Granularity::Minute
        } else if ms <= DAY_MS {
            Granularity::Hour
        } else if ms <= 31 * DAY_MS {
            Granularity::Day
        } else if ms <= 366 * DAY_MS {
            Granularity::Month
        } else {
            Granularity::Year
        }
    }

    /// Floor a UTC timestamp to the start of its bucket
    pub fn floor(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (month, day, hour, minute, second) = match self {
            Granularity::Year => (1, 1, 0, 0, 0),
            Granularity::Month => (time.month(), 1, 0, 0, 0),
            Granularity::Day => (time.month(), time.day(), 0, 0, 0),
            Granularity::Hour => (time.month(), time.day(), time.hour(), 0, 0),
            Granularity::Minute => (time.month(), time.day(), time.hour(), time.minute(), 0),
            Granularity::Second => (
                time.month(),
                time.day(),
                time.hour(),
                time.minute(),
                time.second(),
            ),
        };
        Utc.with_ymd_and_hms(time.year(), month, day, hour, minute, second)
            .single()
    }

    /// Partition label for a millisecond timestamp.
    ///
    /// Returns `None` when the timestamp is outside chrono's range; callers
    /// treat that event as contributing nothing.
    pub fn label(&self, time_ms: i64) -> Option<String> {
        let time = Utc.timestamp_millis_opt(time_ms).single()?;
        let floored = self.floor(time)?;
        Some(floored.format(LABEL_FORMAT).to_string())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "second" => Ok(Granularity::Second),
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(format!("unrecognized granularity: {}", other)),
        }
    }
}

/// Parse a partition label back into its score (UTC milliseconds)
pub fn label_score(label: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(label, LABEL_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Sliding time-window size in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval(u64);

impl Interval {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Renders as raw milliseconds; this is the form embedded in index keys
impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepts raw milliseconds (`3600000`) or a suffixed amount
/// (`90s`, `15m`, `1h`, `30d`).
impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty interval".to_string());
        }
        if let Ok(ms) = s.parse::<u64>() {
            return if ms == 0 {
                Err("interval must be positive".to_string())
            } else {
                Ok(Interval(ms))
            };
        }

        let unit_start = s.char_indices().last().map(|(i, _)| i).unwrap_or(0);
        let (amount, unit) = s.split_at(unit_start);
        let unit_ms = match unit {
            "s" => SECOND_MS,
            "m" => MINUTE_MS,
            "h" => HOUR_MS,
            "d" => DAY_MS,
            _ => return Err(format!("invalid interval: {}", s)),
        };
        let amount: u64 = amount
            .parse()
            .map_err(|_| format!("invalid interval: {}", s))?;
        if amount == 0 {
            return Err("interval must be positive".to_string());
        }
        amount
            .checked_mul(unit_ms)
            .map(Interval)
            .ok_or_else(|| format!("interval too large: {}", s))
    }
}
