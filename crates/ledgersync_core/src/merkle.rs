//! Merkle history index.
//!
//! A base-3 trie over minute buckets. Each message timestamp lands in the
//! bucket of its minute; the bucket key is the minute count written as
//! [`KEY_DIGITS`] base-3 digits, so every leaf sits at the same depth.
//!
//! A message contributes `SHA-256(packed timestamp)` and every node stores the
//! XOR of the contributions beneath it. XOR makes the hash independent of
//! insertion order, so two replicas holding the same message set have the same
//! root however they got there. It also means inserting the same timestamp
//! twice cancels out: callers insert each timestamp exactly once.

use ledgersync_codec::{Timestamp, MILLIS_PER_MINUTE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Depth of the trie; 3^17 minutes reach well past the year 2200.
pub const KEY_DIGITS: usize = 17;

/// Last minute with a key of its own. Later minutes share its bucket, and
/// the ledger and relay refuse them.
pub const MAX_MINUTE: u64 = 3u64.pow(KEY_DIGITS as u32) - 1;

/// A 256-bit node hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TrieHash([u8; 32]);

impl TrieHash {
    /// Hash of an empty subtree.
    pub const ZERO: Self = Self([0; 32]);

    /// Contribution of one message timestamp.
    #[must_use]
    pub fn of(timestamp: &Timestamp) -> Self {
        Self(Sha256::digest(timestamp.to_bytes()).into())
    }

    /// Returns true for the empty-subtree hash.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn toggle(&mut self, other: &Self) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a ^= b;
        }
    }
}

impl fmt::Display for TrieHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TrieHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrieHash({})", hex::encode(&self.0[..6]))
    }
}

impl Serialize for TrieHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for TrieHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let bytes = if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            hex::decode(text).map_err(D::Error::custom)?
        } else {
            serde_bytes_compat::deserialize(deserializer)?
        };
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("trie hash must be 32 bytes"))?;
        Ok(Self(array))
    }
}

mod serde_bytes_compat {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::Deserializer;
    use std::fmt;

    struct HashBytes;

    impl<'de> Visitor<'de> for HashBytes {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("32 hash bytes")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(32);
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        d.deserialize_bytes(HashBytes)
    }
}

/// A half-open range of minute buckets, `[start_minute, end_minute)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketRange {
    /// First minute in the range.
    pub start_minute: u64,
    /// First minute after the range.
    pub end_minute: u64,
}

impl BucketRange {
    /// The single bucket of `minute`.
    #[must_use]
    pub fn minute(minute: u64) -> Self {
        Self {
            start_minute: minute,
            end_minute: minute + 1,
        }
    }

    /// The bucket containing `timestamp`.
    #[must_use]
    pub fn containing(timestamp: &Timestamp) -> Self {
        Self::minute(timestamp.minute())
    }

    /// Returns true if `timestamp` falls inside the range.
    #[must_use]
    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        (self.start_minute..self.end_minute).contains(&timestamp.minute())
    }

    /// First millisecond of the range.
    #[must_use]
    pub fn start_millis(&self) -> u64 {
        self.start_minute.saturating_mul(MILLIS_PER_MINUTE)
    }

    /// First millisecond after the range.
    #[must_use]
    pub fn end_millis(&self) -> u64 {
        self.end_minute.saturating_mul(MILLIS_PER_MINUTE)
    }

    /// Number of buckets covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end_minute - self.start_minute
    }

    /// Returns true if the range covers no bucket.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end_minute <= self.start_minute
    }
}

impl fmt::Display for BucketRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "minutes [{}, {})", self.start_minute, self.end_minute)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    hash: TrieHash,
    children: [Option<Box<Node>>; 3],
}

impl Node {
    fn child(&self, digit: usize) -> Option<&Node> {
        self.children[digit].as_deref()
    }
}

/// The Merkle history index of one replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTrie {
    root: Node,
    entries: u64,
}

impl MerkleTrie {
    /// Creates an empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a trie holding exactly `timestamps`.
    pub fn from_timestamps<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Self {
        let mut trie = Self::new();
        trie.extend(timestamps);
        trie
    }

    /// Returns true if `timestamp` falls in a minute the trie can key.
    #[must_use]
    pub fn covers(timestamp: &Timestamp) -> bool {
        timestamp.minute() <= MAX_MINUTE
    }

    /// Adds one message timestamp and updates every hash up to the root.
    pub fn insert(&mut self, timestamp: &Timestamp) {
        let hash = TrieHash::of(timestamp);
        let mut node = &mut self.root;
        node.hash.toggle(&hash);
        for digit in key_digits(timestamp.minute()) {
            node = node.children[usize::from(digit)]
                .get_or_insert_with(Box::default)
                .as_mut();
            node.hash.toggle(&hash);
        }
        self.entries += 1;
    }

    /// Adds every timestamp of `timestamps`.
    pub fn extend<'a>(&mut self, timestamps: impl IntoIterator<Item = &'a Timestamp>) {
        for ts in timestamps {
            self.insert(ts);
        }
    }

    /// Discards the whole trie and recomputes it from `timestamps`.
    pub fn rebuild<'a>(&mut self, timestamps: impl IntoIterator<Item = &'a Timestamp>) {
        *self = Self::from_timestamps(timestamps);
    }

    /// Empties the trie.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Root hash; equal roots mean equal message sets.
    #[must_use]
    pub fn root_hash(&self) -> TrieHash {
        self.root.hash
    }

    /// Number of timestamps inserted.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Returns true if nothing has been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Hash of a single minute bucket.
    #[must_use]
    pub fn bucket_hash(&self, minute: u64) -> TrieHash {
        let mut node = &self.root;
        for digit in key_digits(minute) {
            match node.child(usize::from(digit)) {
                Some(child) => node = child,
                None => return TrieHash::ZERO,
            }
        }
        node.hash
    }

    /// Buckets whose hashes differ between `self` and `other`.
    ///
    /// Only subtrees whose hashes differ are descended into. The result is
    /// ascending, and adjacent differing buckets are merged into one range.
    #[must_use]
    pub fn diff(&self, other: &MerkleTrie) -> Vec<BucketRange> {
        let mut minutes = Vec::new();
        collect_differences(Some(&self.root), Some(&other.root), 0, 0, &mut minutes);

        let mut ranges: Vec<BucketRange> = Vec::new();
        for minute in minutes {
            match ranges.last_mut() {
                Some(last) if last.end_minute == minute => last.end_minute += 1,
                _ => ranges.push(BucketRange::minute(minute)),
            }
        }
        ranges
    }

    /// Earliest millisecond at which the two histories diverge.
    #[must_use]
    pub fn first_divergence(&self, other: &MerkleTrie) -> Option<u64> {
        self.diff(other).first().map(BucketRange::start_millis)
    }
}

fn collect_differences(
    a: Option<&Node>,
    b: Option<&Node>,
    depth: usize,
    prefix: u64,
    out: &mut Vec<u64>,
) {
    let hash_a = a.map_or(TrieHash::ZERO, |n| n.hash);
    let hash_b = b.map_or(TrieHash::ZERO, |n| n.hash);
    if hash_a == hash_b {
        return;
    }
    if depth == KEY_DIGITS {
        out.push(prefix);
        return;
    }
    for digit in 0..3 {
        collect_differences(
            a.and_then(|n| n.child(digit)),
            b.and_then(|n| n.child(digit)),
            depth + 1,
            prefix * 3 + digit as u64,
            out,
        );
    }
}

/// Most significant digit first. Minutes past [`MAX_MINUTE`] saturate
/// rather than wrap into the low buckets.
fn key_digits(minute: u64) -> [u8; KEY_DIGITS] {
    let mut digits = [0u8; KEY_DIGITS];
    let mut rest = minute.min(MAX_MINUTE);
    for slot in digits.iter_mut().rev() {
        *slot = (rest % 3) as u8;
        rest /= 3;
    }
    digits
}
