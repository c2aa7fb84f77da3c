//! Per-file ledger configuration.

use crate::crypto::KdfParams;
use std::time::Duration;

/// Configuration of one opened budgeting file.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How far ahead of local wall-clock a remote timestamp may be.
    pub max_drift: Duration,
    /// Flush the mutation log after every append.
    pub sync_on_write: bool,
    /// Appends between automatic checkpoints of the state snapshot.
    pub checkpoint_interval: usize,
    /// Argon2id cost used for newly derived keys.
    pub kdf: KdfParams,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_drift: Duration::from_secs(5 * 60),
            sync_on_write: true,
            checkpoint_interval: 512,
            kdf: KdfParams::default(),
        }
    }
}

impl LedgerConfig {
    /// Sets the allowed clock drift.
    #[must_use]
    pub fn with_max_drift(mut self, drift: Duration) -> Self {
        self.max_drift = drift;
        self
    }

    /// Sets whether every append is flushed.
    #[must_use]
    pub fn with_sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Sets the automatic checkpoint interval; `0` disables it.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, appends: usize) -> Self {
        self.checkpoint_interval = appends;
        self
    }

    /// Sets the key derivation cost.
    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Cheap key derivation and no fsync, for tests.
    #[must_use]
    pub fn testing() -> Self {
        Self::default()
            .with_sync_on_write(false)
            .with_kdf(KdfParams::testing())
    }
}
