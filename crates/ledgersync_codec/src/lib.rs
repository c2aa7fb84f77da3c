//! # ledgersync codec
//!
//! The value types that cross device boundaries and their binary formats:
//!
//! - [`Timestamp`] / [`NodeId`]: hybrid logical clock values, packed into 12 bytes
//! - [`Value`]: the closed set of scalars a field can hold
//! - [`Message`]: one field mutation, with a versioned binary codec
//! - [`EncryptedMessage`]: the sealed envelope exchanged with the relay
//!
//! Everything here is pure; nothing touches a clock, a key or a disk.
//!
//! ```
//! use ledgersync_codec::{Message, NodeId, Timestamp, Value};
//!
//! let ts = Timestamp::new(1_704_067_200_000, NodeId::new(1), 0);
//! let msg = Message::new(ts, "categories", "cat1", "name", "Groceries");
//! let bytes = msg.encode().unwrap();
//! assert_eq!(Message::decode(&bytes).unwrap(), msg);
//! assert_eq!(msg.value, Value::from("Groceries"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bytes_serde;
mod envelope;
mod error;
mod message;
mod reader;
mod timestamp;
mod value;

pub use envelope::{EncryptedMessage, ENVELOPE_FORMAT_VERSION, KEY_ID_LEN, NONCE_LEN, TAG_LEN};
pub use error::{CodecError, CodecResult};
pub use message::{Message, MESSAGE_FORMAT_VERSION};
pub use timestamp::{NodeId, Timestamp, MILLIS_PER_MINUTE, TIMESTAMP_LEN};
pub use value::Value;
