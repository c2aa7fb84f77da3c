//! Local mutation log.
//!
//! Append-only sequence of every message this replica has applied, local or
//! remote. Records are framed like this:
//!
//! ```text
//! ┌───────────┬─────────────┬──────────┬───────────────┬──────────┐
//! │ magic (4) │ version (2) │ len (4)  │ payload (len) │ crc (4)  │
//! │  "LSML"   │     LE      │    LE    │               │ LE, over │
//! │           │             │          │               │ all prior│
//! └───────────┴─────────────┴──────────┴───────────────┴──────────┘
//! payload := [origin:1][encoded message]
//! ```
//!
//! A record that is cut short or fails its checksum ends the log: on open it
//! and everything after it are truncated away. A record that passes its
//! checksum but does not decode is real corruption and fails the open.

use crate::checksum::crc32;
use crate::error::{CoreError, CoreResult};
use ledgersync_codec::Message;
use ledgersync_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"LSML";

/// Current log record format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;

const CRC_SIZE: usize = 4;

/// Where a logged message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Recorded on this device.
    Local,
    /// Pulled from the relay.
    Remote,
}

impl Origin {
    /// Converts the origin to its stored byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Local => 1,
            Self::Remote => 2,
        }
    }

    /// Converts a stored byte back to an origin.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Local),
            2 => Some(Self::Remote),
            _ => None,
        }
    }
}

/// One record of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Where the message came from.
    pub origin: Origin,
    /// The message.
    pub message: Message,
}

impl LogEntry {
    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let message = self.message.encode()?;
        let mut payload = Vec::with_capacity(1 + message.len());
        payload.push(self.origin.as_byte());
        payload.extend_from_slice(&message);
        Ok(payload)
    }

    fn decode_payload(offset: u64, payload: &[u8]) -> CoreResult<Self> {
        let (&origin, message) = payload
            .split_first()
            .ok_or_else(|| CoreError::log_corruption(offset, "empty payload"))?;
        let origin = Origin::from_byte(origin)
            .ok_or_else(|| CoreError::log_corruption(offset, format!("unknown origin {origin}")))?;
        let message = Message::decode(message)
            .map_err(|e| CoreError::log_corruption(offset, e.to_string()))?;
        Ok(Self { origin, message })
    }
}

/// Result of reading a log from the start.
#[derive(Debug)]
pub struct LogScan {
    /// Every intact record, in append order.
    pub entries: Vec<LogEntry>,
    /// Bytes covered by intact records.
    pub valid_len: u64,
    /// Total bytes in the store.
    pub total_len: u64,
    /// Why scanning stopped before `total_len`, if it did.
    pub tail_issue: Option<String>,
}

impl LogScan {
    /// Bytes after the last intact record.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Reads every record without modifying the store.
///
/// # Errors
///
/// Returns [`CoreError::LogCorruption`] if a checksummed record does not
/// decode, or a storage error.
pub fn scan(backend: &dyn StorageBackend) -> CoreResult<LogScan> {
    let total_len = backend.size()?;
    let mut entries = Vec::new();
    let mut offset = 0u64;

    let tail_issue = loop {
        let left = total_len - offset;
        if left == 0 {
            break None;
        }
        if left < (HEADER_SIZE + CRC_SIZE) as u64 {
            break Some(format!("{left} trailing bytes shorter than a record header"));
        }

        let header = backend.read_at(offset, HEADER_SIZE)?;
        if header[0..4] != LOG_MAGIC {
            break Some(format!("bad magic at offset {offset}"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            break Some(format!("unknown record version {version} at offset {offset}"));
        }
        let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let record_len = (HEADER_SIZE + len + CRC_SIZE) as u64;
        if record_len > left {
            break Some(format!("record at offset {offset} cut short"));
        }

        let record = backend.read_at(offset, HEADER_SIZE + len + CRC_SIZE)?;
        let (body, crc) = record.split_at(HEADER_SIZE + len);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let actual = crc32(body);
        if stored != actual {
            break Some(format!(
                "checksum mismatch at offset {offset}: stored {stored:08x}, computed {actual:08x}"
            ));
        }

        entries.push(LogEntry::decode_payload(offset, &body[HEADER_SIZE..])?);
        offset += record_len;
    };

    Ok(LogScan {
        entries,
        valid_len: offset,
        total_len,
        tail_issue,
    })
}

/// Append-only writer over a storage backend.
pub struct MutationLog {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    records: u64,
}

impl MutationLog {
    /// Opens a log, truncating any torn tail, and returns its records.
    ///
    /// # Errors
    ///
    /// Returns an error if the log holds a corrupt checksummed record or the
    /// store cannot be read or truncated.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> CoreResult<(Self, LogScan)> {
        let scan = scan(backend.as_ref())?;
        if let Some(issue) = &scan.tail_issue {
            warn!(
                issue = %issue,
                dropped_bytes = scan.torn_bytes(),
                "truncating torn tail of mutation log"
            );
            backend.truncate(scan.valid_len)?;
            backend.sync()?;
        }

        let log = Self {
            backend,
            sync_on_write,
            records: scan.entries.len() as u64,
        };
        Ok((log, scan))
    }

    /// Appends one record and returns its index.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or written.
    pub fn append(&mut self, entry: &LogEntry) -> CoreResult<u64> {
        let payload = entry.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        self.backend.append(&data)?;
        if self.sync_on_write {
            self.backend.flush()?;
        }

        let index = self.records;
        self.records += 1;
        Ok(index)
    }

    /// Number of records in the log.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.records
    }

    /// Returns true if the log has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Makes every appended record durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for MutationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationLog")
            .field("records", &self.records)
            .field("sync_on_write", &self.sync_on_write)
            .finish()
    }
}
