//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The bytes are truncated, carry an unknown type tag, or otherwise do not
    /// form a message.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// What was wrong with the input.
        reason: String,
    },

    /// The leading format-version byte is not one this build understands.
    #[error("unsupported format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the input.
        found: u8,
        /// Version this build writes.
        expected: u8,
    },

    /// An identifier or payload is too long for its length prefix.
    #[error("{field} is {len} bytes, longer than the wire format allows")]
    FieldTooLong {
        /// Which part of the message overflowed.
        field: &'static str,
        /// Its length in bytes.
        len: usize,
    },

    /// A timestamp string could not be parsed.
    #[error("invalid timestamp {input:?}")]
    InvalidTimestamp {
        /// The rejected input.
        input: String,
    },
}

impl CodecError {
    /// Create a malformed message error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Create an invalid timestamp error.
    pub fn invalid_timestamp(input: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            input: input.into(),
        }
    }

    /// Returns true if this error means the input was not a message at all.
    ///
    /// Version mismatches count too: such payloads are dropped the same way.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage { .. } | Self::UnsupportedVersion { .. }
        )
    }
}
