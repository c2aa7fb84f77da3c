//! # ledgersync sync protocol
//!
//! The request/response shapes of one sync round-trip and their CBOR
//! encoding. Pure data: no I/O, no clocks.
//!
//! | Endpoint | Request | Response |
//! |---|---|---|
//! | `/sync/push` | [`PushRequest`] | [`PushResponse`] |
//! | `/sync/pull-diff` | [`PullDiffRequest`] | [`PullDiffResponse`] |
//! | `/sync/pull-messages` | [`PullMessagesRequest`] | [`PullMessagesResponse`] |
//! | `/sync/reset` | [`FileRequest`] | [`Ack`] |
//! | `/sync/repair` | [`FileRequest`] | [`Ack`] |
//!
//! Every response body is a CBOR `Result<T, RemoteError>` so the relay can
//! refuse a request without the transport failing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod endpoint;
mod error;
mod messages;

pub use endpoint::Endpoint;
pub use error::{ProtocolError, ProtocolResult, RemoteError, RemoteErrorKind};
pub use messages::{
    Ack, FileRequest, PullDiffRequest, PullDiffResponse, PullMessagesRequest,
    FileScoped, PullMessagesResponse, PushRequest, PushResponse, Reply, WireMessage,
};
