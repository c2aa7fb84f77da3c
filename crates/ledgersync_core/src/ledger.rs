//! The merge engine.
//!
//! A [`Ledger`] is the whole local sync state of one budgeting file: clock,
//! mutation log, replica, Merkle trie, push watermark and keyring. It is the
//! context object a sync session borrows; two files opened in one process
//! are two independent ledgers.
//!
//! All mutation goes through `&mut self`, which is the single exclusion
//! boundary around "append to the log, fold into the replica, insert into the
//! trie". Crash consistency comes from the completion markers written with
//! every checkpoint: on open, log records past a marker are replayed into the
//! structure the marker belongs to.

use crate::clock::{wall_millis, Clock};
use crate::config::LedgerConfig;
use crate::crypto::Keyring;
use crate::dir::LedgerDir;
use crate::error::{CoreError, CoreResult};
use crate::log::{LogEntry, MutationLog, Origin};
use crate::merkle::{MerkleTrie, TrieHash};
use crate::replica::{Cell, Replica};
use crate::snapshot::StateSnapshot;
use ledgersync_codec::{Message, NodeId, Timestamp, Value};
use ledgersync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use tracing::{debug, info, warn};

/// What applying a message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The message now holds its field.
    Applied,
    /// Logged, but a later message already holds the field.
    Superseded,
    /// Already logged; nothing changed.
    Duplicate,
}

/// How the state snapshot looked when the ledger was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Loaded and trusted.
    Loaded,
    /// None existed; everything was rebuilt from the log.
    Missing,
    /// Unusable; everything was rebuilt from the log.
    Discarded(String),
}

/// What recovery did while opening a ledger.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// State of the snapshot.
    pub snapshot: SnapshotStatus,
    /// Records found in the log.
    pub log_records: u64,
    /// Bytes cut from a torn log tail.
    pub torn_bytes: u64,
    /// Records folded into the replica during recovery.
    pub replica_replayed: u64,
    /// Records inserted into the trie during recovery.
    pub trie_replayed: u64,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    origin: Origin,
    message: Message,
    /// False after a sync reset until the relay is known to hold the message.
    in_trie: bool,
}

/// Local sync state of one budgeting file.
pub struct Ledger {
    config: LedgerConfig,
    clock: Clock,
    log: MutationLog,
    index: BTreeMap<Timestamp, Slot>,
    replica: Replica,
    trie: MerkleTrie,
    watermark: Option<Timestamp>,
    keyring: Keyring,
    state: Box<dyn StorageBackend>,
    since_checkpoint: usize,
    recovery: RecoveryReport,
    dir: Option<LedgerDir>,
}

impl Ledger {
    /// Opens (or creates) the budgeting file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked, the log is corrupt, or
    /// I/O fails.
    pub fn open(path: &Path, config: LedgerConfig) -> CoreResult<Self> {
        let dir = LedgerDir::open(path)?;
        let log = FileBackend::open(&dir.log_path())?;
        let state = FileBackend::open(&dir.state_path())?;

        let mut ledger = Self::with_backends(Box::new(log), Box::new(state), config)?;
        ledger.dir = Some(dir);
        info!(
            path = %path.display(),
            node = %ledger.node(),
            messages = ledger.message_count(),
            "opened budgeting file"
        );
        Ok(ledger)
    }

    /// Creates a throwaway ledger held in memory.
    ///
    /// # Errors
    ///
    /// Only fails if the initial checkpoint fails, which in-memory stores
    /// do not.
    pub fn in_memory(config: LedgerConfig) -> CoreResult<Self> {
        Self::with_backends(
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            config,
        )
    }

    /// Opens a ledger over arbitrary stores, running crash recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the log holds a corrupt checksummed record or a
    /// store cannot be read or written.
    pub fn with_backends(
        log: Box<dyn StorageBackend>,
        state: Box<dyn StorageBackend>,
        config: LedgerConfig,
    ) -> CoreResult<Self> {
        let (log, scan) = MutationLog::open(log, config.sync_on_write)?;
        let log_records = log.len();
        let torn_bytes = scan.torn_bytes();

        let loaded = state
            .read_all()
            .map_err(CoreError::from)
            .and_then(|data| StateSnapshot::decode(&data));
        let (snapshot, mut status) = match loaded {
            Ok(Some(snapshot)) => (Some(snapshot), SnapshotStatus::Loaded),
            Ok(None) => (None, SnapshotStatus::Missing),
            Err(e) => {
                warn!(error = %e, "discarding unreadable state snapshot");
                (None, SnapshotStatus::Discarded(e.to_string()))
            }
        };

        let node = snapshot
            .as_ref()
            .map(|s| s.node)
            .or_else(|| {
                scan.entries
                    .iter()
                    .rev()
                    .find(|e| e.origin == Origin::Local)
                    .map(|e| e.message.timestamp.node())
            })
            .unwrap_or_else(Clock::random_node);
        let mut clock = Clock::restore(node, snapshot.as_ref().map_or(Timestamp::ZERO, |s| s.clock));

        let mut index = BTreeMap::new();
        for (seq, entry) in scan.entries.into_iter().enumerate() {
            let timestamp = entry.message.timestamp;
            clock.observe(timestamp);
            if index.contains_key(&timestamp) {
                warn!(%timestamp, "mutation log repeats a timestamp; ignoring the later record");
                continue;
            }
            index.insert(
                timestamp,
                Slot {
                    seq: seq as u64,
                    origin: entry.origin,
                    message: entry.message,
                    in_trie: true,
                },
            );
        }

        // Markers beyond the log mean the snapshot describes records we no
        // longer have; its replica and trie cannot be trusted.
        let (snapshot, salvaged_keyring) = match snapshot {
            Some(s) if s.replica_through <= log_records && s.trie_through <= log_records => {
                (Some(s), None)
            }
            Some(s) => {
                warn!(
                    replica_through = s.replica_through,
                    trie_through = s.trie_through,
                    log_records,
                    "state snapshot is ahead of the mutation log; rebuilding"
                );
                status = SnapshotStatus::Discarded("completion markers past end of log".into());
                (None, Some(s.keyring))
            }
            None => (None, None),
        };

        let mut replica_replayed = 0;
        let mut trie_replayed = 0;
        let (replica, trie, watermark, keyring) = match snapshot {
            Some(s) => {
                let mut replica = Replica::from_cells(s.replica);
                for slot in index.values().filter(|slot| slot.seq >= s.replica_through) {
                    replica.merge(&slot.message);
                    replica_replayed += 1;
                }

                let mut trie = s.trie;
                for timestamp in &s.detached {
                    if let Some(slot) = index.get_mut(timestamp) {
                        slot.in_trie = false;
                    }
                }
                for slot in index.values().filter(|slot| slot.seq >= s.trie_through) {
                    trie.insert(&slot.message.timestamp);
                    trie_replayed += 1;
                }
                (replica, trie, s.watermark, s.keyring)
            }
            None => {
                let mut replica = Replica::new();
                for slot in index.values() {
                    replica.merge(&slot.message);
                }
                replica_replayed = index.len() as u64;
                trie_replayed = replica_replayed;
                (
                    replica,
                    MerkleTrie::from_timestamps(index.keys()),
                    None,
                    salvaged_keyring.unwrap_or_default(),
                )
            }
        };

        if replica_replayed > 0 || trie_replayed > 0 {
            info!(
                replica_replayed,
                trie_replayed, "replayed mutation log past completion markers"
            );
        }

        let mut ledger = Self {
            config,
            clock,
            log,
            index,
            replica,
            trie,
            watermark,
            keyring,
            state,
            since_checkpoint: 0,
            recovery: RecoveryReport {
                snapshot: status,
                log_records,
                torn_bytes,
                replica_replayed,
                trie_replayed,
            },
            dir: None,
        };

        if ledger.recovery.snapshot != SnapshotStatus::Loaded
            || replica_replayed > 0
            || trie_replayed > 0
        {
            ledger.checkpoint()?;
        }
        Ok(ledger)
    }

    /// Records a local edit: stamps it, logs it and merges it.
    ///
    /// # Errors
    ///
    /// Returns an error if an identifier is too long to encode or the log
    /// append fails.
    pub fn record(
        &mut self,
        dataset: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<Message> {
        let message = Message::new(self.clock.next_timestamp(), dataset, row, column, value);
        debug!(timestamp = %message.timestamp, dataset = %message.dataset, "recording local edit");
        let (message, _) = self.append(Origin::Local, message)?;
        Ok(message)
    }

    /// Applies a message received from elsewhere.
    ///
    /// Last-writer-wins has no rejection path, so apart from persisting the
    /// message the only refusal is a timestamp the Merkle index cannot key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TimestampOutOfRange`] past [`MAX_MINUTE`], or an
    /// error if the log append fails.
    ///
    /// [`MAX_MINUTE`]: crate::MAX_MINUTE
    pub fn apply(&mut self, message: Message) -> CoreResult<ApplyOutcome> {
        let timestamp = message.timestamp;
        if !MerkleTrie::covers(&timestamp) {
            return Err(CoreError::TimestampOutOfRange { timestamp });
        }
        if let Some(slot) = self.index.get_mut(&timestamp) {
            if !slot.message.same_field(&message) || slot.message.value != message.value {
                warn!(%timestamp, "message reuses a logged timestamp with different content; keeping the logged one");
            }
            if !slot.in_trie {
                slot.in_trie = true;
                self.trie.insert(&timestamp);
            }
            return Ok(ApplyOutcome::Duplicate);
        }

        self.clock.observe(timestamp);
        let (_, outcome) = self.append(Origin::Remote, message)?;
        Ok(outcome)
    }

    fn append(&mut self, origin: Origin, message: Message) -> CoreResult<(Message, ApplyOutcome)> {
        let entry = LogEntry { origin, message };
        let seq = self.log.append(&entry)?;
        let message = entry.message;

        let outcome = if self.replica.merge(&message) {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Superseded
        };
        self.trie.insert(&message.timestamp);
        self.index.insert(
            message.timestamp,
            Slot {
                seq,
                origin,
                message: message.clone(),
                in_trie: true,
            },
        );

        self.since_checkpoint += 1;
        if self.config.checkpoint_interval > 0
            && self.since_checkpoint >= self.config.checkpoint_interval
        {
            self.checkpoint()?;
        }
        Ok((message, outcome))
    }

    /// Rejects a remote timestamp too far ahead of local wall-clock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ClockDrift`] past the configured limit.
    pub fn check_drift(&self, timestamp: Timestamp) -> CoreResult<()> {
        Clock::check_drift_at(timestamp, wall_millis(), self.config.max_drift)
    }

    /// Messages the next push should send.
    ///
    /// With a watermark, the local messages after it. Without one (a fresh
    /// file, or after a reset) every local message plus every message the
    /// relay is not known to hold.
    #[must_use]
    pub fn pending_push(&self) -> Vec<Message> {
        match self.watermark {
            Some(watermark) => self
                .index
                .range((Bound::Excluded(watermark), Bound::Unbounded))
                .filter(|(_, slot)| slot.origin == Origin::Local)
                .map(|(_, slot)| slot.message.clone())
                .collect(),
            None => self
                .index
                .values()
                .filter(|slot| slot.origin == Origin::Local || !slot.in_trie)
                .map(|slot| slot.message.clone())
                .collect(),
        }
    }

    /// Notes that the relay now stores these messages.
    pub fn mark_pushed<'a>(&mut self, timestamps: impl IntoIterator<Item = &'a Timestamp>) {
        for timestamp in timestamps {
            if let Some(slot) = self.index.get_mut(timestamp) {
                if !slot.in_trie {
                    slot.in_trie = true;
                    self.trie.insert(timestamp);
                }
            }
        }
    }

    /// Raises the watermark to `timestamp` if it is higher.
    pub fn advance_watermark(&mut self, timestamp: Timestamp) {
        if self.watermark.map_or(true, |w| timestamp > w) {
            self.watermark = Some(timestamp);
        }
    }

    /// Called once the relay's root matched a trie taken while `upto` was
    /// the newest logged message. Everything up to `upto` is on the relay;
    /// edits logged since then are not, so the watermark stops there.
    pub fn note_converged(&mut self, upto: Timestamp) {
        let held = self.index.range(..=upto).next_back().map(|(ts, _)| *ts);
        if let Some(held) = held {
            self.advance_watermark(held);
        }
    }

    /// Forgets what the relay holds: empties the trie and drops the
    /// watermark. The log and the replica are untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails.
    pub fn reset_sync_state(&mut self) -> CoreResult<()> {
        self.trie.clear();
        self.watermark = None;
        for slot in self.index.values_mut() {
            slot.in_trie = false;
        }
        info!(messages = self.index.len(), "reset sync state");
        self.checkpoint()
    }

    /// Rebuilds the trie from the full log.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails.
    pub fn repair(&mut self) -> CoreResult<TrieHash> {
        for slot in self.index.values_mut() {
            slot.in_trie = true;
        }
        self.trie.rebuild(self.index.keys());
        info!(root = %self.trie.root_hash(), messages = self.index.len(), "rebuilt Merkle index");
        self.checkpoint()?;
        Ok(self.trie.root_hash())
    }

    /// Rebuilds the replica by folding the log in ascending timestamp order.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails.
    pub fn replay_all(&mut self) -> CoreResult<()> {
        self.replica.clear();
        for slot in self.index.values() {
            self.replica.merge(&slot.message);
        }
        debug!(fields = self.replica.len(), "replayed replica from log");
        self.checkpoint()
    }

    /// Trie the ledger should have given which messages are marked synced.
    #[must_use]
    pub fn expected_trie(&self) -> MerkleTrie {
        MerkleTrie::from_timestamps(
            self.index
                .iter()
                .filter(|(_, slot)| slot.in_trie)
                .map(|(ts, _)| ts),
        )
    }

    /// Persists the snapshot, making every logged record complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be synced or the snapshot written.
    pub fn checkpoint(&mut self) -> CoreResult<()> {
        self.log.sync()?;
        let through = self.log.len();
        let snapshot = StateSnapshot {
            node: self.clock.node(),
            clock: self.clock.floor(),
            watermark: self.watermark,
            trie: self.trie.clone(),
            detached: self
                .index
                .iter()
                .filter(|(_, slot)| !slot.in_trie)
                .map(|(ts, _)| *ts)
                .collect(),
            replica: self.replica.to_cells(),
            replica_through: through,
            trie_through: through,
            keyring: std::mem::take(&mut self.keyring),
        };
        let encoded = snapshot.encode();
        // Unlocked keys are skipped by serde, so put the live ring back.
        self.keyring = snapshot.keyring;
        self.state.replace(&encoded?)?;
        self.since_checkpoint = 0;
        debug!(through, "checkpointed state snapshot");
        Ok(())
    }

    /// Checkpoints and releases the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the final checkpoint fails.
    pub fn close(mut self) -> CoreResult<()> {
        self.checkpoint()
    }

    /// This replica's node id.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.clock.node()
    }

    /// Greatest timestamp issued or observed.
    #[must_use]
    pub fn clock_floor(&self) -> Timestamp {
        self.clock.floor()
    }

    /// Highest timestamp known to be on the relay.
    #[must_use]
    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    /// The Merkle history index.
    #[must_use]
    pub fn trie(&self) -> &MerkleTrie {
        &self.trie
    }

    /// Root of the Merkle history index.
    #[must_use]
    pub fn root_hash(&self) -> TrieHash {
        self.trie.root_hash()
    }

    /// The materialized replica.
    #[must_use]
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Current value of a field.
    #[must_use]
    pub fn get(&self, dataset: &str, row: &str, column: &str) -> Option<&Value> {
        self.replica.get(dataset, row, column)
    }

    /// Current value and writer of a field.
    #[must_use]
    pub fn cell(&self, dataset: &str, row: &str, column: &str) -> Option<&Cell> {
        self.replica.cell(dataset, row, column)
    }

    /// All fields of one row.
    #[must_use]
    pub fn row(&self, dataset: &str, row: &str) -> BTreeMap<String, Value> {
        self.replica.row(dataset, row)
    }

    /// Number of logged messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.index.len()
    }

    /// Returns true if a message with this timestamp is logged.
    #[must_use]
    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        self.index.contains_key(timestamp)
    }

    /// Newest logged timestamp.
    #[must_use]
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.index.keys().next_back().copied()
    }

    /// Logged messages in ascending timestamp order, with their origin.
    pub fn messages(&self) -> impl Iterator<Item = (&Message, Origin)> {
        self.index.values().map(|slot| (&slot.message, slot.origin))
    }

    /// Logged messages strictly after `timestamp`.
    pub fn messages_since(&self, timestamp: Timestamp) -> impl Iterator<Item = &Message> {
        self.index
            .range((Bound::Excluded(timestamp), Bound::Unbounded))
            .map(|(_, slot)| &slot.message)
    }

    /// The keyring.
    #[must_use]
    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// The keyring, for key management. Checkpoint afterwards to persist.
    pub fn keyring_mut(&mut self) -> &mut Keyring {
        &mut self.keyring
    }

    /// The ledger configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// What recovery did when this ledger was opened.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Directory of an on-disk ledger.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(LedgerDir::path)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("node", &self.clock.node())
            .field("messages", &self.index.len())
            .field("root", &self.trie.root_hash())
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}
