//! Budgeting file directory layout.
//!
//! ```text
//! <file_dir>/
//! ├─ LOCK            # advisory lock, one writer per file
//! ├─ messages.log    # mutation log
//! └─ state.bin       # state snapshot
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "messages.log";
const STATE_FILE: &str = "state.bin";

/// An opened, exclusively locked budgeting file directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct LedgerDir {
    path: PathBuf,
    _lock_file: File,
}

impl LedgerDir {
    /// Opens the directory, creating it if missing, and takes the lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LedgerLocked`] if another process holds the lock,
    /// [`CoreError::InvalidOperation`] if `path` is not a directory, or an
    /// I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::LedgerLocked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the budgeting file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the mutation log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Path of the state snapshot.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.path.join(STATE_FILE)
    }
}
