//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::keys::KeyManager;
use crate::session::SyncSession;
use crate::transport::SyncTransport;
use ledgersync_core::{Ledger, TrieHash};
use ledgersync_sync_protocol::{Ack, FileRequest};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Uploading local messages.
    Pushing,
    /// Comparing tries and fetching diverging buckets.
    Pulling,
    /// Decrypting and applying fetched messages.
    Merging,
    /// The last attempt failed.
    Failed,
    /// Waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if a sync is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pushing | SyncState::Pulling | SyncState::Merging
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Failed | SyncState::RetryWait
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of messages pushed.
    pub messages_pushed: u64,
    /// Total number of messages pulled.
    pub messages_pulled: u64,
    /// Pulled messages that changed a field.
    pub messages_applied: u64,
    /// Pulled messages dropped as malformed.
    pub messages_dropped: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last successful sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Push/pull/merge rounds it took.
    pub rounds: u32,
    /// Messages pushed.
    pub pushed: u64,
    /// Messages pulled.
    pub pulled: u64,
    /// Pulled messages that changed a field.
    pub applied: u64,
    /// Pulled messages that lost to a newer local value.
    pub superseded: u64,
    /// Pulled messages already in the log.
    pub duplicates: u64,
    /// Pulled messages dropped as malformed.
    pub dropped: u64,
    /// Local root hash after the sync.
    pub root: TrieHash,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

/// The sync engine keeps one ledger in step with a relay.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    ledger: Arc<Mutex<Ledger>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    group_id: Mutex<Option<Uuid>>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a sync engine over a shared ledger.
    pub fn new(config: SyncConfig, transport: T, ledger: Arc<Mutex<Ledger>>) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            ledger,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            group_id: Mutex::new(None),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the ledger.
    pub fn ledger(&self) -> &Arc<Mutex<Ledger>> {
        &self.ledger
    }

    /// Key management for the ledger this engine syncs.
    pub fn keys(&self) -> KeyManager {
        KeyManager::new(Arc::clone(&self.ledger))
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// History generation of the relay file this engine last synced with.
    pub fn group_id(&self) -> Option<Uuid> {
        *self.group_id.lock()
    }

    /// Restores a group id persisted by the application.
    pub fn set_group_id(&self, group_id: Option<Uuid>) {
        *self.group_id.lock() = group_id;
    }

    /// Cancels the sync in flight, or the next one if none is running.
    ///
    /// Honoured up to the point where merging starts. A cancel that arrives
    /// later is discarded when that sync returns, and a sync that fails
    /// retryably after a cancel reports [`SyncError::Cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Clears the cancelled flag, returning whether it was set.
    fn take_cancelled(&self) -> bool {
        self.cancelled.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Adopts the relay's group on first contact, and rejects a different one
    /// afterwards.
    pub(crate) fn check_group(&self, found: Uuid) -> SyncResult<()> {
        let mut group = self.group_id.lock();
        match *group {
            Some(expected) if expected != found => Err(SyncError::FileReset { expected, found }),
            Some(_) => Ok(()),
            None => {
                *group = Some(found);
                Ok(())
            }
        }
    }

    fn begin(&self, operation: &str) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: operation.into(),
            });
        }
        *state = SyncState::Pushing;
        Ok(())
    }

    /// Performs one sync: push, then pull and merge until the relay and the
    /// ledger agree.
    ///
    /// # Errors
    ///
    /// Transport failures and timeouts leave the ledger as it was before the
    /// failing call. Credential and drift failures abort before anything
    /// from the offending batch is applied. The whole sync must finish within
    /// [`SyncConfig::timeout`].
    pub async fn sync(&self) -> SyncResult<SyncCycleResult> {
        self.begin("sync")?;

        let outcome = self.within_deadline(SyncSession::new(self).run()).await;
        // A cancel that came too late to stop this sync is spent all the same.
        let cancelled = self.take_cancelled();
        let outcome = match outcome {
            Err(e) if cancelled && e.is_retryable() => Err(SyncError::Cancelled),
            other => other,
        };
        match outcome {
            Ok(result) => {
                self.set_state(SyncState::Idle);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.messages_pushed += result.pushed;
                stats.messages_pulled += result.pulled;
                stats.messages_applied += result.applied;
                stats.messages_dropped += result.dropped;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                Ok(result)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Performs a sync with retry on transient errors.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last error once
    /// attempts run out.
    pub async fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = retry_config.delay_for_attempt(attempt);
                tokio::time::sleep(delay).await;

                self.stats.write().retries += 1;
            }

            if self.take_cancelled() {
                let err = SyncError::Cancelled;
                self.handle_error(&err);
                return Err(err);
            }

            match self.sync().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        warn!(attempt, error = %e, "sync failed, will retry");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
    }

    /// Wipes the relay's copy of the file and forgets local sync state, so
    /// the next sync uploads the full log as a new history generation.
    ///
    /// # Errors
    ///
    /// If the relay call fails, local state is untouched.
    pub async fn reset(&self) -> SyncResult<Uuid> {
        self.begin("reset")?;
        let result = self.within_deadline(self.reset_both()).await;
        self.settle(result)
    }

    async fn reset_both(&self) -> SyncResult<Uuid> {
        let request = self.file_request();
        let ack = self.timed(self.transport.reset(&request)).await?;
        self.ledger.lock().reset_sync_state()?;
        *self.group_id.lock() = Some(ack.group_id);
        info!(group = %ack.group_id, "reset file on relay");
        Ok(ack.group_id)
    }

    /// Forgets local sync state only, e.g. to follow a reset made by another
    /// device.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot checkpoint.
    pub fn reset_local(&self) -> SyncResult<()> {
        self.begin("reset")?;
        let result = self
            .ledger
            .lock()
            .reset_sync_state()
            .map_err(SyncError::from);
        *self.group_id.lock() = None;
        self.settle(result)
    }

    /// Rebuilds the local trie from the log, then asks the relay to rebuild
    /// its trie from its stored messages.
    ///
    /// # Errors
    ///
    /// Returns an error if either rebuild fails.
    pub async fn repair(&self) -> SyncResult<Ack> {
        self.begin("repair")?;
        let result = self.within_deadline(self.repair_both()).await;
        self.settle(result)
    }

    async fn repair_both(&self) -> SyncResult<Ack> {
        let root = self.ledger.lock().repair()?;
        let request = self.file_request();
        let ack = self.timed(self.transport.repair(&request)).await?;
        self.check_group(ack.group_id)?;
        info!(local = %root, relay = %ack.root, "repaired Merkle indexes");
        Ok(ack)
    }

    fn file_request(&self) -> FileRequest {
        FileRequest::new(self.config.file_id.clone(), self.config.token.clone())
    }

    /// Runs a whole sync, reset or repair under [`SyncConfig::timeout`].
    async fn within_deadline<R>(
        &self,
        operation: impl Future<Output = SyncResult<R>>,
    ) -> SyncResult<R> {
        tokio::time::timeout(self.config.timeout, operation)
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    /// Runs a transport call after checking for cancellation, bounded by
    /// [`SyncConfig::request_timeout`] when one is set.
    pub(crate) async fn timed<R>(
        &self,
        call: impl Future<Output = SyncResult<R>>,
    ) -> SyncResult<R> {
        self.check_cancelled()?;
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| SyncError::Timeout)?,
            None => call.await,
        }
    }

    fn settle<R>(&self, result: SyncResult<R>) -> SyncResult<R> {
        match &result {
            Ok(_) => self.set_state(SyncState::Idle),
            Err(e) => self.handle_error(e),
        }
        result
    }

    /// Handles an error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        warn!(error = %error, "sync operation failed");
        self.set_state(SyncState::Failed);
        self.stats.write().last_error = Some(error.to_string());
    }
}

impl<T: SyncTransport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("file_id", &self.config.file_id)
            .field("state", &self.state())
            .field("group_id", &self.group_id())
            .finish_non_exhaustive()
    }
}
