//! Encrypted message envelopes.
//!
//! ```text
//! [version:1][timestamp:12][key-id:16][nonce:12][ciphertext][tag:16]
//! ```
//!
//! The timestamp travels in clear so the relay can bucket and index a message
//! without being able to read it. Sealing binds the packed timestamp as
//! associated data, so an envelope cannot be replayed under another timestamp.

use crate::bytes_serde::ByteStringVisitor;
use crate::error::{CodecError, CodecResult};
use crate::reader::Reader;
use crate::timestamp::{Timestamp, TIMESTAMP_LEN};
use bytes::BufMut;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Version byte at the front of every envelope.
pub const ENVELOPE_FORMAT_VERSION: u8 = 1;

/// Nonce length of the AEAD.
pub const NONCE_LEN: usize = 12;

/// Authentication tag length of the AEAD.
pub const TAG_LEN: usize = 16;

/// Length of a key identifier.
pub const KEY_ID_LEN: usize = 16;

const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + KEY_ID_LEN + NONCE_LEN;

/// An encrypted [`Message`](crate::Message) as stored by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    /// Timestamp of the sealed message, in clear.
    pub timestamp: Timestamp,
    /// Key that sealed the payload.
    pub key_id: Uuid,
    /// AEAD nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the authentication tag appended.
    pub sealed: Vec<u8>,
}

impl EncryptedMessage {
    /// Encodes the envelope.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.sealed.len());
        out.put_u8(ENVELOPE_FORMAT_VERSION);
        self.timestamp.write(&mut out);
        out.put_slice(self.key_id.as_bytes());
        out.put_slice(&self.nonce);
        out.put_slice(&self.sealed);
        out
    }

    /// Decodes an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedVersion`] for an unknown version and
    /// [`CodecError::MalformedMessage`] if the input is shorter than a header
    /// plus an authentication tag.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8("envelope version")?;
        if version != ENVELOPE_FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                expected: ENVELOPE_FORMAT_VERSION,
            });
        }

        let timestamp = Timestamp::read(&mut reader)?;
        let key_id = Uuid::from_bytes(reader.array::<KEY_ID_LEN>("key id")?);
        let nonce = reader.array::<NONCE_LEN>("nonce")?;
        if reader.remaining() < TAG_LEN {
            return Err(CodecError::malformed(format!(
                "sealed payload of {} bytes is shorter than the authentication tag",
                reader.remaining()
            )));
        }
        let sealed = reader.rest().to_vec();

        Ok(Self {
            timestamp,
            key_id,
            nonce,
            sealed,
        })
    }
}

impl Serialize for EncryptedMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.encode())
    }
}

impl<'de> Deserialize<'de> for EncryptedMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = deserializer.deserialize_bytes(ByteStringVisitor {
            expecting: "an encrypted message envelope",
        })?;
        Self::decode(&bytes).map_err(serde::de::Error::custom)
    }
}
