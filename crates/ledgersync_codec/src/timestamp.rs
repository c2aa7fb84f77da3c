//! Hybrid logical timestamps.
//!
//! A [`Timestamp`] is `(millis, node, counter)` and orders by those fields in
//! that order. Packed on the wire as 12 big-endian bytes:
//!
//! ```text
//! ┌──────────────┬──────────┬───────────┐
//! │ millis (8)   │ node (2) │ counter(2)│
//! └──────────────┴──────────┴───────────┘
//! ```
//!
//! Big-endian packing makes bytewise comparison of packed timestamps agree
//! with [`Ord`].

use crate::bytes_serde::ByteStringVisitor;
use crate::error::{CodecError, CodecResult};
use crate::reader::Reader;
use bytes::BufMut;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a packed timestamp in bytes.
pub const TIMESTAMP_LEN: usize = 12;

/// Milliseconds in one Merkle bucket.
pub const MILLIS_PER_MINUTE: u64 = 60_000;

/// Identifier of one device replica of a budgeting file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(u16);

impl NodeId {
    /// Wraps a raw node identifier.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u16::deserialize(deserializer).map(Self)
    }
}

/// A causal timestamp: wall-clock millis, issuing node, per-millisecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    millis: u64,
    node: NodeId,
    counter: u16,
}

impl Timestamp {
    /// The smallest timestamp.
    pub const ZERO: Self = Self::new(0, NodeId::new(0), 0);

    /// Creates a timestamp from its parts.
    #[must_use]
    pub const fn new(millis: u64, node: NodeId, counter: u16) -> Self {
        Self {
            millis,
            node,
            counter,
        }
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub const fn millis(&self) -> u64 {
        self.millis
    }

    /// The node that issued this timestamp.
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Counter within the millisecond.
    #[must_use]
    pub const fn counter(&self) -> u16 {
        self.counter
    }

    /// Whole minutes since the epoch; the Merkle bucket of this timestamp.
    #[must_use]
    pub const fn minute(&self) -> u64 {
        self.millis / MILLIS_PER_MINUTE
    }

    /// Packs the timestamp into its 12-byte wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; TIMESTAMP_LEN] {
        let mut out = [0u8; TIMESTAMP_LEN];
        let mut buf = &mut out[..];
        buf.put_u64(self.millis);
        buf.put_u16(self.node.0);
        buf.put_u16(self.counter);
        out
    }

    /// Unpacks a 12-byte timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedMessage`] unless `bytes` is exactly
    /// [`TIMESTAMP_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = Reader::new(bytes);
        let ts = Self::read(&mut reader)?;
        reader.finish("timestamp")?;
        Ok(ts)
    }

    pub(crate) fn read(reader: &mut Reader<'_>) -> CodecResult<Self> {
        let millis = reader.u64("timestamp millis")?;
        let node = NodeId(reader.u16("timestamp node")?);
        let counter = reader.u16("timestamp counter")?;
        Ok(Self::new(millis, node, counter))
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.to_bytes());
    }
}

impl fmt::Display for Timestamp {
    /// Renders `2024-01-01T00:00:00.000Z-0001-00ff` (instant, counter, node).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instant = i64::try_from(self.millis)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        match instant {
            Some(instant) => write!(
                f,
                "{}-{:04x}-{}",
                instant.to_rfc3339_opts(SecondsFormat::Millis, true),
                self.counter,
                self.node
            ),
            None => write!(f, "@{}-{:04x}-{}", self.millis, self.counter, self.node),
        }
    }
}

impl FromStr for Timestamp {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '-');
        let (Some(node), Some(counter), Some(instant)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::invalid_timestamp(s));
        };

        let node = u16::from_str_radix(node, 16).map_err(|_| CodecError::invalid_timestamp(s))?;
        let counter =
            u16::from_str_radix(counter, 16).map_err(|_| CodecError::invalid_timestamp(s))?;
        let millis = match instant.strip_prefix('@') {
            Some(raw) => raw.parse().map_err(|_| CodecError::invalid_timestamp(s))?,
            None => DateTime::parse_from_rfc3339(instant)
                .ok()
                .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
                .ok_or_else(|| CodecError::invalid_timestamp(s))?,
        };

        Ok(Self::new(millis, NodeId(node), counter))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = deserializer.deserialize_bytes(ByteStringVisitor {
                expecting: "a 12-byte packed timestamp",
            })?;
            Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_millis_then_node_then_counter() {
        let a = Timestamp::new(1_000, NodeId::new(2), 0);
        let b = Timestamp::new(1_000, NodeId::new(1), 9);
        let c = Timestamp::new(999, NodeId::new(9), 9);
        let d = Timestamp::new(1_000, NodeId::new(2), 1);

        assert!(c < b);
        assert!(b < a);
        assert!(a < d);
    }

    #[test]
    fn packed_bytes_sort_like_timestamps() {
        let a = Timestamp::new(1_700_000_000_000, NodeId::new(0xff00), 3);
        let b = Timestamp::new(1_700_000_000_001, NodeId::new(0x0001), 0);
        assert!(a < b);
        assert!(a.to_bytes() < b.to_bytes());
    }

    #[test]
    fn pack_layout() {
        let ts = Timestamp::new(0x0102_0304_0506_0708, NodeId::new(0x090a), 0x0b0c);
        assert_eq!(
            ts.to_bytes(),
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
        );
        assert_eq!(Timestamp::from_bytes(&ts.to_bytes()).unwrap(), ts);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(matches!(
            Timestamp::from_bytes(&[0u8; 11]),
            Err(CodecError::MalformedMessage { .. })
        ));
        assert!(matches!(
            Timestamp::from_bytes(&[0u8; 13]),
            Err(CodecError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn display_and_parse() {
        let ts = Timestamp::new(1_704_067_200_000, NodeId::new(0x00ff), 1);
        let text = ts.to_string();
        assert_eq!(text, "2024-01-01T00:00:00.000Z-0001-00ff");
        assert_eq!(text.parse::<Timestamp>().unwrap(), ts);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("yesterday".parse::<Timestamp>().is_err());
        assert!("2024-01-01T00:00:00.000Z-zzzz-00ff".parse::<Timestamp>().is_err());
    }

    #[test]
    fn minute_bucket() {
        let ts = Timestamp::new(2 * MILLIS_PER_MINUTE + 59_999, NodeId::new(1), 0);
        assert_eq!(ts.minute(), 2);
    }

    #[test]
    fn serde_uses_bytes_in_cbor_and_text_in_json() {
        let ts = Timestamp::new(1_704_067_200_123, NodeId::new(0xabcd), 7);

        let mut cbor = Vec::new();
        ciborium::into_writer(&ts, &mut cbor).unwrap();
        // 0x4c = byte string of length 12
        assert_eq!(cbor[0], 0x4c);
        let back: Timestamp = ciborium::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(back, ts);

        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-01T00:00:00.123Z-0007-abcd\"");
        assert_eq!(serde_json::from_str::<Timestamp>(&json).unwrap(), ts);
    }
}
