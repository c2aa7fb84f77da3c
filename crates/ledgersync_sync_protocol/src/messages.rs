//! Protocol messages.

use crate::error::{ProtocolError, ProtocolResult, RemoteError};
use ledgersync_codec::{EncryptedMessage, Timestamp};
use ledgersync_core::{BucketRange, MerkleTrie, TrieHash};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CBOR encoding shared by every protocol message.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Type name used in error messages.
    const NAME: &'static str;

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out).map_err(|e| ProtocolError::Encode {
            what: Self::NAME,
            message: e.to_string(),
        })?;
        Ok(out)
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if the bytes are not a valid
    /// message of this type.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode {
            what: Self::NAME,
            message: e.to_string(),
        })
    }
}

/// Body of every relay response.
pub type Reply<T> = Result<T, RemoteError>;

impl<T: WireMessage> WireMessage for Reply<T> {
    const NAME: &'static str = "reply";
}

/// Messages addressed to one budgeting file on the relay.
pub trait FileScoped {
    /// Target file.
    fn file_id(&self) -> &str;
    /// Sync token, if the relay requires one.
    fn token(&self) -> Option<&str>;
}

macro_rules! file_scoped {
    ($($ty:ty),*) => {
        $(
            impl FileScoped for $ty {
                fn file_id(&self) -> &str {
                    &self.file_id
                }

                fn token(&self) -> Option<&str> {
                    self.token.as_deref()
                }
            }
        )*
    };
}

/// Upload of locally originated messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Target file.
    pub file_id: String,
    /// Sync token.
    pub token: Option<String>,
    /// Watermark the client pushed from.
    pub since: Option<Timestamp>,
    /// Sealed messages, ascending.
    pub messages: Vec<EncryptedMessage>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(
        file_id: impl Into<String>,
        token: Option<String>,
        since: Option<Timestamp>,
        messages: Vec<EncryptedMessage>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            token,
            since,
            messages,
        }
    }
}

/// Relay's answer to a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Greatest timestamp in the batch, or `since` if it was empty.
    pub new_watermark: Option<Timestamp>,
    /// Messages not already stored.
    pub stored: u32,
    /// Current history generation of the file.
    pub group_id: Uuid,
}

/// Comparison of the client's trie with the relay's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullDiffRequest {
    /// Target file.
    pub file_id: String,
    /// Sync token.
    pub token: Option<String>,
    /// The client's Merkle trie.
    pub trie: MerkleTrie,
}

impl PullDiffRequest {
    /// Creates a diff request.
    pub fn new(file_id: impl Into<String>, token: Option<String>, trie: MerkleTrie) -> Self {
        Self {
            file_id: file_id.into(),
            token,
            trie,
        }
    }
}

/// Buckets where client and relay disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullDiffResponse {
    /// Diverging bucket ranges, ascending.
    pub diverging: Vec<BucketRange>,
    /// The relay's root hash.
    pub remote_root: TrieHash,
    /// Current history generation of the file.
    pub group_id: Uuid,
}

impl PullDiffResponse {
    /// Returns true if nothing diverges.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.diverging.is_empty()
    }
}

/// Fetch of every message in some bucket ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullMessagesRequest {
    /// Target file.
    pub file_id: String,
    /// Sync token.
    pub token: Option<String>,
    /// Ranges to fetch.
    pub buckets: Vec<BucketRange>,
}

impl PullMessagesRequest {
    /// Creates a fetch request.
    pub fn new(
        file_id: impl Into<String>,
        token: Option<String>,
        buckets: Vec<BucketRange>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            token,
            buckets,
        }
    }
}

/// Messages in the requested ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullMessagesResponse {
    /// Sealed messages, ascending.
    pub messages: Vec<EncryptedMessage>,
}

/// A request naming only a file: reset and repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    /// Target file.
    pub file_id: String,
    /// Sync token.
    pub token: Option<String>,
}

impl FileRequest {
    /// Creates a file request.
    pub fn new(file_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            file_id: file_id.into(),
            token,
        }
    }
}

/// Acknowledgement of reset or repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// History generation after the operation.
    pub group_id: Uuid,
    /// Relay root hash after the operation.
    pub root: TrieHash,
}

file_scoped!(PushRequest, PullDiffRequest, PullMessagesRequest, FileRequest);

impl WireMessage for PushRequest {
    const NAME: &'static str = "push request";
}

impl WireMessage for PushResponse {
    const NAME: &'static str = "push response";
}

impl WireMessage for PullDiffRequest {
    const NAME: &'static str = "pull-diff request";
}

impl WireMessage for PullDiffResponse {
    const NAME: &'static str = "pull-diff response";
}

impl WireMessage for PullMessagesRequest {
    const NAME: &'static str = "pull-messages request";
}

impl WireMessage for PullMessagesResponse {
    const NAME: &'static str = "pull-messages response";
}

impl WireMessage for FileRequest {
    const NAME: &'static str = "file request";
}

impl WireMessage for Ack {
    const NAME: &'static str = "ack";
}
