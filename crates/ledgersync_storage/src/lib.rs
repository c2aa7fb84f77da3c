//! # ledgersync storage
//!
//! Byte stores underneath a budgeting file's persisted sync state.
//!
//! Backends are **opaque**: they never look inside the bytes they hold. The
//! mutation log frames and checksums its own records and the state snapshot
//! carries its own header; a backend only has to read, append, truncate and
//! atomically replace.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and throwaway ledgers; handles can share one buffer
//! - [`FileBackend`] - a single OS file, with write-then-rename replacement
//!
//! ## Example
//!
//! ```rust
//! use ledgersync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"LSML").unwrap();
//! assert_eq!(backend.read_at(offset, 4).unwrap(), b"LSML");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
