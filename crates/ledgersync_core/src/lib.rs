//! # ledgersync core
//!
//! The local half of ledgersync: everything a device needs to edit a
//! budgeting file offline and later prove, cheaply, whether it agrees with
//! the relay.
//!
//! - [`Clock`]: hybrid logical clock stamping every local edit
//! - [`crypto`]: Argon2id key derivation and AES-256-GCM sealing
//! - [`MerkleTrie`]: minute-bucketed history index used to find divergence
//! - [`MutationLog`]: append-only, checksummed record of every message
//! - [`Replica`]: last-writer-wins view of each field
//! - [`Ledger`]: ties them together with crash recovery
//!
//! ```
//! use ledgersync_core::{Ledger, LedgerConfig};
//! use ledgersync_codec::Value;
//!
//! let mut ledger = Ledger::in_memory(LedgerConfig::testing()).unwrap();
//! ledger.record("categories", "cat1", "name", "Groceries").unwrap();
//! assert_eq!(
//!     ledger.get("categories", "cat1", "name"),
//!     Some(&Value::from("Groceries"))
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod clock;
mod config;
pub mod crypto;
mod dir;
mod error;
mod ledger;
mod log;
mod merkle;
mod replica;
mod snapshot;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use clock::{wall_millis, Clock};
pub use config::LedgerConfig;
pub use crypto::{Cipher, EncryptionKey, KdfParams, KeyRecord, Keyring};
pub use dir::LedgerDir;
pub use error::{CoreError, CoreResult};
pub use ledger::{ApplyOutcome, Ledger, RecoveryReport, SnapshotStatus};
pub use log::{scan as scan_log, LogEntry, LogScan, MutationLog, Origin, LOG_MAGIC, LOG_VERSION};
pub use merkle::{BucketRange, MerkleTrie, TrieHash, KEY_DIGITS, MAX_MINUTE};
pub use replica::{Cell, FieldKey, Replica};

pub use ledgersync_codec::{EncryptedMessage, Message, NodeId, Timestamp, Value};
