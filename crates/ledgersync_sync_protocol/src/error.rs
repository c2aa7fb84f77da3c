//! Protocol errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for protocol encoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Could not encode.
    #[error("failed to encode {what}: {message}")]
    Encode {
        /// Message type.
        what: &'static str,
        /// Encoder error.
        message: String,
    },

    /// Could not decode.
    #[error("failed to decode {what}: {message}")]
    Decode {
        /// Message type.
        what: &'static str,
        /// Decoder error.
        message: String,
    },
}

/// Why the relay refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Missing, invalid or expired sync token.
    Unauthorized,
    /// The request could not be understood.
    BadRequest,
    /// The request exceeds relay limits.
    TooLarge,
    /// The relay failed; try again later.
    Internal,
}

/// An error reported by the relay inside a well-formed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Category.
    pub kind: RemoteErrorKind,
    /// Detail for logs.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an `Unauthorized` error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unauthorized, message)
    }

    /// Creates a `BadRequest` error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::BadRequest, message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}
