//! One sync attempt: push, diff, fetch, merge, repeated until the relay
//! and the ledger agree.

use crate::engine::{SyncCycleResult, SyncEngine, SyncState};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use ledgersync_codec::{EncryptedMessage, Message, Timestamp};
use ledgersync_core::{ApplyOutcome, BucketRange, CoreError, Ledger, MerkleTrie, TrieHash};
use ledgersync_sync_protocol::{PullDiffRequest, PullMessagesRequest, PushRequest};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Ephemeral state of a single `sync()` call.
pub(crate) struct SyncSession<'a, T: SyncTransport> {
    engine: &'a SyncEngine<T>,
    /// Timestamps the relay holds but whose payload could not be decoded here.
    dropped: BTreeSet<Timestamp>,
    /// Newest logged message when the last compared trie was taken.
    compared_through: Option<Timestamp>,
    result: SyncCycleResult,
    started: Instant,
}

impl<'a, T: SyncTransport> SyncSession<'a, T> {
    pub(crate) fn new(engine: &'a SyncEngine<T>) -> Self {
        Self {
            engine,
            dropped: BTreeSet::new(),
            compared_through: None,
            result: SyncCycleResult::default(),
            started: Instant::now(),
        }
    }

    pub(crate) async fn run(mut self) -> SyncResult<SyncCycleResult> {
        let max_rounds = self.engine.config().max_rounds;
        let mut last_diverging = Vec::new();

        for round in 1..=max_rounds {
            self.result.rounds = round;

            self.engine.set_state(SyncState::Pushing);
            self.push_pending().await?;

            self.engine.set_state(SyncState::Pulling);
            let diverging = self.pull_diff().await?;
            if diverging.is_empty() {
                return self.finish();
            }
            let envelopes = self.pull_messages(&diverging).await?;

            // Last point at which cancellation is honoured.
            self.engine.check_cancelled()?;

            self.engine.set_state(SyncState::Merging);
            let progressed = self.merge(envelopes)?;
            if !progressed {
                // Edits recorded after the push were compared but not sent.
                let unsent = !self.engine.ledger().lock().pending_push().is_empty();
                if !unsent {
                    warn!(buckets = diverging.len(), round, "pull made no progress");
                    return Err(SyncError::DivergedHistory { buckets: diverging });
                }
                debug!(round, "local edits arrived mid-sync, pushing again");
            }
            last_diverging = diverging;
        }

        warn!(rounds = max_rounds, "no convergence within round limit");
        Err(SyncError::DivergedHistory {
            buckets: last_diverging,
        })
    }

    /// The ledger's trie plus the timestamps dropped this session, which the
    /// relay holds and the ledger never will.
    fn adjusted_trie(&self, ledger: &Ledger) -> MerkleTrie {
        let mut trie = ledger.trie().clone();
        trie.extend(self.dropped.iter().filter(|ts| !ledger.contains(ts)));
        trie
    }

    fn adjusted_root(&self) -> TrieHash {
        let ledger = self.engine.ledger().lock();
        self.adjusted_trie(&ledger).root_hash()
    }

    async fn push_pending(&mut self) -> SyncResult<()> {
        let (pending, since) = {
            let ledger = self.engine.ledger().lock();
            (ledger.pending_push(), ledger.watermark())
        };
        if pending.is_empty() {
            return Ok(());
        }

        let config = self.engine.config();
        let batch_size = config.push_batch_size as usize;
        for chunk in pending.chunks(batch_size) {
            let sealed = self.seal(chunk)?;
            let request = PushRequest::new(
                config.file_id.clone(),
                config.token.clone(),
                since,
                sealed,
            );
            let response = self.engine.timed(self.engine.transport().push(&request)).await?;
            self.engine.check_group(response.group_id)?;

            {
                let mut ledger = self.engine.ledger().lock();
                ledger.mark_pushed(chunk.iter().map(|m| &m.timestamp));
                if let Some(watermark) = response.new_watermark {
                    ledger.advance_watermark(watermark);
                }
            }

            debug!(
                count = chunk.len(),
                stored = response.stored,
                "pushed batch"
            );
            self.result.pushed += chunk.len() as u64;
        }
        Ok(())
    }

    fn seal(&self, messages: &[Message]) -> SyncResult<Vec<EncryptedMessage>> {
        let ledger = self.engine.ledger().lock();
        let keyring = ledger.keyring();
        messages
            .iter()
            .map(|m| keyring.seal(m).map_err(SyncError::from))
            .collect()
    }

    async fn pull_diff(&mut self) -> SyncResult<Vec<BucketRange>> {
        let trie = {
            let ledger = self.engine.ledger().lock();
            self.compared_through = ledger.latest_timestamp();
            self.adjusted_trie(&ledger)
        };
        let local_root = trie.root_hash();

        let config = self.engine.config();
        let request = PullDiffRequest::new(config.file_id.clone(), config.token.clone(), trie);
        let response = self.engine.timed(self.engine.transport().pull_diff(&request)).await?;
        self.engine.check_group(response.group_id)?;

        if response.is_converged() || response.remote_root == local_root {
            return Ok(Vec::new());
        }
        debug!(
            buckets = response.diverging.len(),
            remote_root = %response.remote_root,
            "tries diverge"
        );
        Ok(response.diverging)
    }

    async fn pull_messages(&mut self, buckets: &[BucketRange]) -> SyncResult<Vec<EncryptedMessage>> {
        let config = self.engine.config();
        let request = PullMessagesRequest::new(
            config.file_id.clone(),
            config.token.clone(),
            buckets.to_vec(),
        );
        let response = self
            .engine
            .timed(self.engine.transport().pull_messages(&request))
            .await?;
        self.result.pulled += response.messages.len() as u64;
        Ok(response.messages)
    }

    /// Decrypts the whole batch, then applies it. Returns whether the
    /// adjusted root moved.
    fn merge(&mut self, envelopes: Vec<EncryptedMessage>) -> SyncResult<bool> {
        let before = self.adjusted_root();
        let mut ledger = self.engine.ledger().lock();

        for envelope in &envelopes {
            ledger.check_drift(envelope.timestamp)?;
        }

        let mut messages = Vec::with_capacity(envelopes.len());
        for envelope in &envelopes {
            match ledger.keyring().open(envelope) {
                Ok(message) => messages.push(message),
                Err(CoreError::Codec(e)) => {
                    warn!(timestamp = %envelope.timestamp, error = %e, "dropping malformed message");
                    self.dropped.insert(envelope.timestamp);
                    self.result.dropped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        for message in messages {
            match ledger.apply(message)? {
                ApplyOutcome::Applied => self.result.applied += 1,
                ApplyOutcome::Superseded => self.result.superseded += 1,
                ApplyOutcome::Duplicate => self.result.duplicates += 1,
            }
        }

        let after = self.adjusted_trie(&ledger).root_hash();
        Ok(after != before)
    }

    /// Moves the watermark up to everything the relay was compared against
    /// and persists it.
    fn finish(mut self) -> SyncResult<SyncCycleResult> {
        {
            let mut ledger = self.engine.ledger().lock();
            if let Some(upto) = self.compared_through {
                ledger.note_converged(upto);
            }
            ledger.checkpoint()?;
            self.result.root = ledger.root_hash();
        }

        self.result.duration = self.started.elapsed();
        info!(
            rounds = self.result.rounds,
            pushed = self.result.pushed,
            pulled = self.result.pulled,
            applied = self.result.applied,
            dropped = self.result.dropped,
            root = %self.result.root,
            "sync converged"
        );
        Ok(self.result)
    }
}
