//! # ledgersync relay
//!
//! A reference implementation of the relay every device syncs through. It
//! never sees plaintext: it stores sealed messages keyed by their clear
//! timestamp, keeps its own Merkle trie over them, and answers diffs.
//!
//! Per file it keeps:
//! - every pushed envelope, deduplicated by timestamp
//! - a Merkle trie over those timestamps
//! - a group id, regenerated whenever the file is reset
//!
//! # Authentication
//!
//! Optional HMAC-SHA256 sync tokens bound to a file id:
//!
//! ```
//! use ledgersync_sync_server::{RelayServer, ServerConfig};
//!
//! let server = RelayServer::new(ServerConfig::default().with_auth(b"relay secret".to_vec()));
//! let token = server.create_token("budget-1").unwrap();
//! assert!(server.validate_token(&token, "budget-1").is_ok());
//! assert!(server.validate_token(&token, "budget-2").is_err());
//! ```
//!
//! # Transport
//!
//! [`RelayServer::handle_post`] takes a request path and CBOR body and
//! returns a CBOR reply, so the server can sit behind any HTTP stack or be
//! called in-process.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::RelayServer;
pub use store::{FileStore, RelayStore};
