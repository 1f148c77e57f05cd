//! Key layout for persisted aggregation state
//!
//! ```text
//! index key : <namespace>:<jobName>[:<parser>[_<interval>]]
//! member    : <index key>:result:<partitionLabel>
//! cursor    : <namespace>:<jobName>[:<parser|*>[_<interval>]]
//! ```
//!
//! A cursor key carries a suffix only for runs restricted to one parser
//! and/or interval, so such runs never move the full job's cursor.

use crate::partition::Interval;

pub fn index_key(
    namespace: &str,
    job_name: &str,
    parser: Option<&str>,
    interval: Option<Interval>,
) -> String {
    let mut key = format!("{}:{}", namespace, job_name);
    if let Some(parser) = parser {
        key.push(':');
        key.push_str(parser);
        if let Some(interval) = interval {
            key.push('_');
            key.push_str(&interval.to_string());
        }
    }
    key
}

pub fn member(index_key: &str, partition_label: &str) -> String {
    format!("{}:result:{}", index_key, partition_label)
}

pub fn cursor_key(
    namespace: &str,
    job_name: &str,
    only_parser: Option<&str>,
    only_interval: Option<Interval>,
) -> String {
    match (only_parser, only_interval) {
        (None, None) => format!("{}:{}", namespace, job_name),
        (Some(parser), None) => format!("{}:{}:{}", namespace, job_name, parser),
        (parser, Some(interval)) => format!(
            "{}:{}:{}_{}",
            namespace,
            job_name,
            parser.unwrap_or("*"),
            interval
        ),
    }
}

/// Partition label embedded in a member name, if it follows the layout
pub fn member_label<'a>(index_key: &str, member: &'a str) -> Option<&'a str> {
    member
        .strip_prefix(index_key)
        .and_then(|rest| rest.strip_prefix(":result:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let hour: Interval = "1h".parse().unwrap();
        assert_eq!(index_key("mainevent", "CountAllPartitioned", None, None), "mainevent:CountAllPartitioned");
        assert_eq!(
            index_key("mainevent", "CountAllPartitioned", Some("Json"), None),
            "mainevent:CountAllPartitioned:Json"
        );
        // interval without parser is ignored
        assert_eq!(
            index_key("mainevent", "CountAllPartitioned", None, Some(hour)),
            "mainevent:CountAllPartitioned"
        );

        let key = index_key("mainevent", "CountAllPartitioned", Some("Json"), Some(hour));
        assert_eq!(key, "mainevent:CountAllPartitioned:Json_3600000");

        let m = member(&key, "03/12/2009 10:00:00");
        assert_eq!(m, "mainevent:CountAllPartitioned:Json_3600000:result:03/12/2009 10:00:00");
        assert_eq!(member_label(&key, &m), Some("03/12/2009 10:00:00"));
        assert_eq!(member_label("other", &m), None);
    }

    #[test]
    fn test_cursor_key_suffixes() {
        let day: Interval = "1d".parse().unwrap();
        assert_eq!(cursor_key("ns", "job", None, None), "ns:job");
        assert_eq!(cursor_key("ns", "job", Some("Json"), None), "ns:job:Json");
        assert_eq!(cursor_key("ns", "job", Some("Json"), Some(day)), "ns:job:Json_86400000");
        assert_eq!(cursor_key("ns", "job", None, Some(day)), "ns:job:*_86400000");
    }
}
