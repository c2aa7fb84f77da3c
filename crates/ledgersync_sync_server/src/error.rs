//! Error types for the relay.

use ledgersync_sync_protocol::{ProtocolError, RemoteError, RemoteErrorKind};
use thiserror::Error;

/// Result type for relay operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the relay can report.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, invalid or expired token.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Batch over the configured limit.
    #[error("push of {len} messages exceeds limit of {max}")]
    TooLarge {
        /// Messages in the request.
        len: usize,
        /// Configured limit.
        max: u32,
    },

    /// Body could not be decoded or reply encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Misconfiguration or internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if the client caused this error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotAuthorized(_)
                | ServerError::TooLarge { .. }
                | ServerError::Protocol(_)
        )
    }

    /// The error as sent back to the client.
    pub fn to_remote(&self) -> RemoteError {
        let kind = match self {
            ServerError::InvalidRequest(_) | ServerError::Protocol(_) => RemoteErrorKind::BadRequest,
            ServerError::NotAuthorized(_) => RemoteErrorKind::Unauthorized,
            ServerError::TooLarge { .. } => RemoteErrorKind::TooLarge,
            ServerError::Internal(_) => RemoteErrorKind::Internal,
        };
        RemoteError::new(kind, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert!(ServerError::NotAuthorized("expired".into()).is_client_error());
        assert!(!ServerError::Internal("boom".into()).is_client_error());

        let remote = ServerError::TooLarge { len: 5, max: 2 }.to_remote();
        assert_eq!(remote.kind, RemoteErrorKind::TooLarge);
        assert!(remote.message.contains("exceeds limit of 2"));
    }
}
