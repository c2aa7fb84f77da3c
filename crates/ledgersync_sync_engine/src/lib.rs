//! # ledgersync sync engine
//!
//! Keeps a [`Ledger`](ledgersync_core::Ledger) in step with a relay.
//!
//! This crate provides:
//! - Sync state machine (idle → pushing → pulling → merging → idle)
//! - Merkle-diff driven pulls of only the diverging minutes
//! - Reset and repair flows
//! - Retry with exponential backoff, per-call timeouts and cancellation
//! - HTTP transport abstraction
//! - Key management for the application
//!
//! ## Architecture
//!
//! Each sync is a push-then-pull session of one or more rounds:
//! 1. Push local messages past the watermark, sealed
//! 2. Send the local trie; the relay answers with diverging buckets
//! 3. Fetch those buckets, decrypt the whole batch, then apply it
//!
//! Rounds repeat until the relay reports nothing diverging.
//!
//! ## Key Invariants
//!
//! - Transport calls are the only suspension points
//! - The ledger lock is never held across a transport call
//! - A pulled batch that fails authentication is not applied at all
//! - Applying the same messages twice is a no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod keys;
mod session;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult, UserFacingFailure};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use keys::KeyManager;
pub use transport::{MockTransport, SyncTransport};
