//! Error types for ledgersync core.

use ledgersync_codec::Timestamp;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ledgersync_storage::StorageError),

    /// Message codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ledgersync_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A checksummed log record decoded to garbage.
    #[error("mutation log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Byte offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The state snapshot could not be read back.
    #[error("state snapshot corruption: {message}")]
    SnapshotCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the budgeting file.
    #[error("budgeting file {} is locked by another process", path.display())]
    LedgerLocked {
        /// Directory of the locked file.
        path: PathBuf,
    },

    /// Ciphertext was altered or sealed under a different key.
    #[error("authentication failed: ciphertext was tampered with or the key is wrong")]
    AuthenticationFailed,

    /// A key check failed: wrong secret for a stored key, or a message sealed
    /// by a key this device does not hold.
    #[error("key mismatch for key {key_id}")]
    KeyMismatch {
        /// Key that could not be matched.
        key_id: Uuid,
    },

    /// No key has been derived or unlocked yet.
    #[error("no encryption key is active")]
    NoActiveKey,

    /// Key derivation rejected its parameters.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },

    /// A remote timestamp is further ahead of the local clock than allowed.
    #[error("clock drift: {remote} is {drift_ms} ms ahead (limit {max_ms} ms)")]
    ClockDrift {
        /// The offending timestamp.
        remote: Timestamp,
        /// How far ahead of local wall-clock it is.
        drift_ms: u64,
        /// Configured limit.
        max_ms: u64,
    },

    /// A timestamp lies past the last minute the Merkle index can key.
    #[error("timestamp {timestamp} is beyond the Merkle index range")]
    TimestampOutOfRange {
        /// The offending timestamp.
        timestamp: Timestamp,
    },

    /// Snapshot (de)serialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates a snapshot corruption error.
    pub fn snapshot_corruption(message: impl Into<String>) -> Self {
        Self::SnapshotCorruption {
            message: message.into(),
        }
    }

    /// Creates a key derivation error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for failures caused by wrong or missing credentials.
    #[must_use]
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::KeyMismatch { .. } | Self::NoActiveKey
        )
    }
}
