//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod repair;
pub mod verify;

use std::path::{Path, PathBuf};

/// Name of the mutation log inside a budgeting file directory.
const LOG_FILE: &str = "messages.log";

/// Path of the mutation log, failing if there is no budgeting file at `path`.
pub(crate) fn log_path(path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log = path.join(LOG_FILE);
    if !log.exists() {
        return Err(format!("No budgeting file found at {}", path.display()).into());
    }
    Ok(log)
}
