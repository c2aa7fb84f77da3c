//! Relay-side storage of sealed messages.

use ledgersync_codec::{EncryptedMessage, NodeId, Timestamp};
use ledgersync_core::{BucketRange, MerkleTrie, TrieHash};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use uuid::Uuid;

/// Everything the relay holds for one budgeting file.
#[derive(Debug, Clone)]
pub struct FileStore {
    group_id: Uuid,
    messages: BTreeMap<Timestamp, EncryptedMessage>,
    trie: MerkleTrie,
}

impl FileStore {
    /// Creates an empty file with a fresh group id.
    pub fn new() -> Self {
        Self {
            group_id: Uuid::new_v4(),
            messages: BTreeMap::new(),
            trie: MerkleTrie::new(),
        }
    }

    /// Stores a message unless one with its timestamp is already stored.
    ///
    /// Returns true if it was new.
    pub fn insert(&mut self, message: EncryptedMessage) -> bool {
        if self.messages.contains_key(&message.timestamp) {
            return false;
        }
        self.trie.insert(&message.timestamp);
        self.messages.insert(message.timestamp, message);
        true
    }

    /// Messages whose timestamps fall in any of `ranges`, ascending.
    pub fn messages_in(&self, ranges: &[BucketRange]) -> Vec<EncryptedMessage> {
        let mut out: BTreeMap<Timestamp, &EncryptedMessage> = BTreeMap::new();
        for range in ranges {
            let start = Timestamp::new(range.start_millis(), NodeId::new(0), 0);
            for (ts, message) in self.messages.range((Bound::Included(start), Bound::Unbounded)) {
                if ts.millis() >= range.end_millis() {
                    break;
                }
                out.insert(*ts, message);
            }
        }
        out.into_values().cloned().collect()
    }

    /// Drops every message and starts a new history generation.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Rebuilds the trie from the stored messages.
    pub fn repair(&mut self) {
        self.trie.rebuild(self.messages.keys());
    }

    /// Current history generation.
    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    /// The relay's trie for this file.
    pub fn trie(&self) -> &MerkleTrie {
        &self.trie
    }

    /// Root hash of the relay's trie.
    pub fn root_hash(&self) -> TrieHash {
        self.trie.root_hash()
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Every file the relay knows about.
#[derive(Debug, Default)]
pub struct RelayStore {
    files: RwLock<HashMap<String, FileStore>>,
}

impl RelayStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against a file, creating it on first use.
    pub fn with_file<R>(&self, file_id: &str, f: impl FnOnce(&mut FileStore) -> R) -> R {
        let mut files = self.files.write();
        let file = files.entry(file_id.to_owned()).or_default();
        f(file)
    }

    /// Runs `f` against a file if it exists.
    pub fn read_file<R>(&self, file_id: &str, f: impl FnOnce(&FileStore) -> R) -> Option<R> {
        self.files.read().get(file_id).map(f)
    }

    /// Number of files.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }
}
