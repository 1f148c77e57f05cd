//! Sortable event identifiers
//!
//! Every event gets a 12-byte id at insert time:
//!
//! ```text
//! [ 4 bytes unix seconds | 5 bytes writer identity | 3 bytes counter ]
//! ```
//!
//! Ids render as 24 lowercase hex characters, so comparing two rendered ids
//! as strings (which is what SQLite does for `id > ?`) gives the same answer
//! as comparing the structured values.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const ID_BYTES: usize = 12;
const COUNTER_MASK: u32 = 0x00ff_ffff;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid id length: expected 24 hex chars, got {0}")]
    Length(usize),
    #[error("invalid hex in id: {0}")]
    Hex(String),
}

/// Structured sortable identifier.
///
/// Field order matters: the derived `Ord` compares `timestamp`, then
/// `writer`, then `counter`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortableId {
    timestamp: u32,
    writer: [u8; 5],
    counter: u32,
}

impl SortableId {
    pub fn new(timestamp: u32, writer: [u8; 5], counter: u32) -> Self {
        Self {
            timestamp,
            writer,
            counter: counter & COUNTER_MASK,
        }
    }

    /// Embedded creation time (unix seconds)
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn writer(&self) -> [u8; 5] {
        self.writer
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> [u8; ID_BYTES] {
        let mut bytes = [0u8; ID_BYTES];
        bytes[0..4].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.writer);
        bytes[9..12].copy_from_slice(&self.counter.to_be_bytes()[1..4]);
        bytes
    }

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        let timestamp = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut writer = [0u8; 5];
        writer.copy_from_slice(&bytes[4..9]);
        let counter = u32::from_be_bytes([0, bytes[9], bytes[10], bytes[11]]);
        Self {
            timestamp,
            writer,
            counter,
        }
    }

    /// Largest id in `ids`, or `None` when empty
    pub fn max_of<I>(ids: I) -> Option<SortableId>
    where
        I: IntoIterator<Item = SortableId>,
    {
        ids.into_iter().max()
    }
}

impl fmt::Display for SortableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for SortableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SortableId").field(&self.to_string()).finish()
    }
}

impl FromStr for SortableId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_BYTES * 2 {
            return Err(IdError::Length(s.len()));
        }
        let decoded = hex::decode(s).map_err(|e| IdError::Hex(e.to_string()))?;
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&decoded);
        Ok(Self::from_bytes(bytes))
    }
}

impl Serialize for SortableId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SortableId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value
            .parse::<SortableId>()
            .map_err(|err| serde::de::Error::custom(err.to_string()))
    }
}

/// Assigns ids for one writer (one event store handle)
#[derive(Debug)]
pub struct SortableIdGenerator {
    writer: [u8; 5],
    counter: u32,
}

impl SortableIdGenerator {
    /// Random writer identity, random counter seed in the lower half of the
    /// counter space.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let writer: [u8; 5] = rng.gen();
        let counter = rng.gen_range(0..(COUNTER_MASK >> 1));
        Self::with_writer(writer, counter)
    }

    pub fn with_writer(writer: [u8; 5], counter_seed: u32) -> Self {
        Self {
            writer,
            counter: counter_seed & COUNTER_MASK,
        }
    }

    pub fn next_id(&mut self) -> SortableId {
        self.next_id_at(current_unix_seconds())
    }

    /// Id for an explicit creation second (used by backfills and tests)
    pub fn next_id_at(&mut self, timestamp: u32) -> SortableId {
        let id = SortableId::new(timestamp, self.writer, self.counter);
        self.counter = (self.counter + 1) & COUNTER_MASK;
        id
    }
}

impl Default for SortableIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn current_unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_precedence() {
        let early = SortableId::new(100, [9, 9, 9, 9, 9], 999);
        let late = SortableId::new(101, [0, 0, 0, 0, 0], 0);
        assert!(early < late, "timestamp dominates writer and counter");

        let writer_a = SortableId::new(100, [0, 0, 0, 0, 1], 50);
        let writer_b = SortableId::new(100, [0, 0, 0, 0, 2], 1);
        assert!(writer_a < writer_b, "writer breaks timestamp ties");

        let first = SortableId::new(100, [0, 0, 0, 0, 1], 1);
        let second = SortableId::new(100, [0, 0, 0, 0, 1], 2);
        assert!(first < second, "counter breaks writer ties");
    }

    #[test]
    fn test_hex_order_matches_struct_order() {
        let ids = [
            SortableId::new(1_236_848_405, [1, 2, 3, 4, 5], 7),
            SortableId::new(1_236_848_405, [1, 2, 3, 4, 6], 0),
            SortableId::new(1_236_848_406, [0, 0, 0, 0, 0], 0),
            SortableId::new(1_236_848_406, [0, 0, 0, 0, 0], 0x00ff_fffe),
        ];
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_string() < pair[1].to_string());
        }
    }

    #[test]
    fn test_parse_display() {
        let id = SortableId::new(0x499b_1b15, [0xde, 0xad, 0xbe, 0xef, 0x01], 0x0a0b0c);
        let rendered = id.to_string();
        assert_eq!(rendered, "499b1b15deadbeef010a0b0c");
        assert_eq!(rendered.parse::<SortableId>().unwrap(), id);

        assert_eq!("abc".parse::<SortableId>(), Err(IdError::Length(3)));
        assert!("zz9b1b15deadbeef010a0b0c".parse::<SortableId>().is_err());
    }

    #[test]
    fn test_generator_is_increasing() {
        let mut generator = SortableIdGenerator::with_writer([1, 1, 1, 1, 1], 10);
        let a = generator.next_id_at(500);
        let b = generator.next_id_at(500);
        let c = generator.next_id_at(501);
        assert!(a < b && b < c);
        assert_eq!(SortableId::max_of(vec![b, c, a]), Some(c));
        assert_eq!(SortableId::max_of(Vec::new()), None);
    }

    #[test]
    fn test_serde_as_string() {
        let id = SortableId::new(42, [1, 2, 3, 4, 5], 6);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: SortableId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
