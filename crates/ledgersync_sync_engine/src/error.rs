//! Error types for the sync engine.

use ledgersync_codec::Timestamp;
use ledgersync_core::{BucketRange, CoreError};
use ledgersync_sync_protocol::{ProtocolError, RemoteError, RemoteErrorKind};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A request did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// The transport is closed.
    #[error("not connected to relay")]
    NotConnected,

    /// Bodies could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The relay refused the sync token.
    #[error("relay refused credentials: {0}")]
    Unauthorized(String),

    /// The relay failed internally.
    #[error("relay error: {0}")]
    ServerError(String),

    /// A pulled message failed authentication.
    #[error("authentication failed: pulled data was tampered with or the key is wrong")]
    AuthenticationFailed,

    /// A pulled message was sealed under a key this device does not hold,
    /// or a secret did not match the stored key.
    #[error("key mismatch for key {key_id}")]
    KeyMismatch {
        /// The key that could not be matched.
        key_id: Uuid,
    },

    /// No key is derived or unlocked.
    #[error("no encryption key is active")]
    NoActiveKey,

    /// A pulled timestamp is too far ahead of local time.
    #[error("clock drift: {remote} is {drift_ms} ms ahead (limit {max_ms} ms)")]
    ClockDrift {
        /// The offending timestamp.
        remote: Timestamp,
        /// How far ahead it is.
        drift_ms: u64,
        /// Configured limit.
        max_ms: u64,
    },

    /// Local and relay histories cannot be reconciled by exchanging buckets.
    #[error("history has diverged in {} bucket range(s); reset or repair needed", buckets.len())]
    DivergedHistory {
        /// Buckets still diverging.
        buckets: Vec<BucketRange>,
    },

    /// The relay's copy of the file was reset by another device.
    #[error("file was reset on the relay (group {expected} is now {found})")]
    FileReset {
        /// Group this device last synced with.
        expected: Uuid,
        /// Group the relay reports now.
        found: Uuid,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target.
        to: String,
    },

    /// Local ledger error.
    #[error("ledger error: {0}")]
    Ledger(CoreError),
}

/// The three failures a user is ever shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacingFailure {
    /// "Sync failed, will retry."
    RetryLater,
    /// "Password incorrect."
    PasswordIncorrect,
    /// "This file's history has diverged; repair or reset."
    HistoryDiverged,
}

impl fmt::Display for UserFacingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UserFacingFailure::RetryLater => "sync failed, will retry",
            UserFacingFailure::PasswordIncorrect => "password incorrect",
            UserFacingFailure::HistoryDiverged => {
                "this file's history has diverged; repair or reset"
            }
        })
    }
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Which of the user-visible failures this is.
    pub fn user_facing(&self) -> UserFacingFailure {
        match self {
            SyncError::Unauthorized(_)
            | SyncError::AuthenticationFailed
            | SyncError::KeyMismatch { .. }
            | SyncError::NoActiveKey => UserFacingFailure::PasswordIncorrect,
            SyncError::DivergedHistory { .. } | SyncError::FileReset { .. } => {
                UserFacingFailure::HistoryDiverged
            }
            SyncError::Ledger(e) if e.is_credential_error() => UserFacingFailure::PasswordIncorrect,
            _ => UserFacingFailure::RetryLater,
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed => SyncError::AuthenticationFailed,
            CoreError::KeyMismatch { key_id } => SyncError::KeyMismatch { key_id },
            CoreError::NoActiveKey => SyncError::NoActiveKey,
            CoreError::ClockDrift {
                remote,
                drift_ms,
                max_ms,
            } => SyncError::ClockDrift {
                remote,
                drift_ms,
                max_ms,
            },
            other => SyncError::Ledger(other),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::Unauthorized => SyncError::Unauthorized(err.message),
            RemoteErrorKind::BadRequest | RemoteErrorKind::TooLarge => {
                SyncError::Protocol(err.message)
            }
            RemoteErrorKind::Internal => SyncError::ServerError(err.message),
        }
    }
}
