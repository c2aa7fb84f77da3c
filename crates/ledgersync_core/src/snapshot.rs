//! Persisted state snapshot (`state.bin`).
//!
//! Everything that is not the log itself: node id, clock floor, watermark,
//! Merkle trie, replica cells and key records. `replica_through` and
//! `trie_through` are completion markers: the number of log records already
//! folded into the replica and the trie. Records past a marker are replayed
//! on open.
//!
//! Framing: `"LSST" | version u16 LE | len u32 LE | CBOR | crc32 LE`.

use crate::checksum::crc32;
use crate::crypto::Keyring;
use crate::error::{CoreError, CoreResult};
use crate::merkle::MerkleTrie;
use crate::replica::{Cell, FieldKey};
use ledgersync_codec::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};

const SNAPSHOT_MAGIC: [u8; 4] = *b"LSST";
const SNAPSHOT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StateSnapshot {
    pub node: NodeId,
    pub clock: Timestamp,
    pub watermark: Option<Timestamp>,
    pub trie: MerkleTrie,
    /// Logged timestamps (below `trie_through`) that are not in the trie.
    pub detached: Vec<Timestamp>,
    pub replica: Vec<(FieldKey, Cell)>,
    pub replica_through: u64,
    pub trie_through: u64,
    pub keyring: Keyring,
}

impl StateSnapshot {
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body)
            .map_err(|e| CoreError::serialization(e.to_string()))?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::invalid_operation("state snapshot too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        data.extend_from_slice(&SNAPSHOT_MAGIC);
        data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&body);
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// `Ok(None)` for an empty store.
    pub(crate) fn decode(data: &[u8]) -> CoreResult<Option<Self>> {
        if data.is_empty() {
            return Ok(None);
        }
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(CoreError::snapshot_corruption("shorter than its header"));
        }
        if data[..4] != SNAPSHOT_MAGIC {
            return Err(CoreError::snapshot_corruption("bad magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(CoreError::snapshot_corruption(format!(
                "unknown version {version}"
            )));
        }
        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        if data.len() != HEADER_SIZE + len + CRC_SIZE {
            return Err(CoreError::snapshot_corruption(format!(
                "length field says {len} bytes, file holds {}",
                data.len() - HEADER_SIZE - CRC_SIZE
            )));
        }

        let (framed, crc) = data.split_at(HEADER_SIZE + len);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let actual = crc32(framed);
        if stored != actual {
            return Err(CoreError::snapshot_corruption(format!(
                "checksum mismatch: stored {stored:08x}, computed {actual:08x}"
            )));
        }

        ciborium::from_reader(&framed[HEADER_SIZE..])
            .map(Some)
            .map_err(|e| CoreError::snapshot_corruption(e.to_string()))
    }
}
