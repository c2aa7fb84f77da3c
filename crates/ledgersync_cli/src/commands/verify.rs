//! Verify command implementation.

use ledgersync_core::{scan_log, Ledger, LedgerConfig, SnapshotStatus};
use ledgersync_storage::FileBackend;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Intact log records.
    pub records: usize,
    /// Bytes after the last intact record.
    pub torn_bytes: u64,
    /// Problems found.
    pub errors: Vec<String>,
    /// Findings that recovery fixes on its own.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying budgeting file at {}", path.display());
    println!();

    let result = verify(path)?;

    println!("Log records: {}", result.records);
    for warning in &result.warnings {
        println!("  WARN: {warning}");
    }
    for error in &result.errors {
        println!("  ERROR: {error}");
    }
    println!();

    if result.is_ok() {
        println!("✓ Budgeting file verification passed");
        Ok(())
    } else {
        println!("✗ Budgeting file verification FAILED");
        Err("verification failed".into())
    }
}

fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let log_path = super::log_path(path)?;
    let mut result = VerifyResult::default();

    // Scan before opening: opening truncates a torn tail.
    {
        let backend = FileBackend::open(&log_path)?;
        match scan_log(&backend) {
            Ok(scan) => {
                result.records = scan.entries.len();
                result.torn_bytes = scan.torn_bytes();
                if let Some(ref issue) = scan.tail_issue {
                    result.warnings.push(format!(
                        "{} torn byte(s) at end of log: {issue}",
                        scan.torn_bytes()
                    ));
                }
            }
            Err(e) => {
                result.errors.push(format!("log: {e}"));
                return Ok(result);
            }
        }
    }

    let ledger = Ledger::open(path, LedgerConfig::default())?;
    if let SnapshotStatus::Discarded(why) = &ledger.recovery().snapshot {
        result
            .warnings
            .push(format!("snapshot discarded, state rebuilt from log: {why}"));
    }

    let stored = ledger.trie().root_hash();
    let expected = ledger.expected_trie().root_hash();
    if stored != expected {
        result.errors.push(format!(
            "Merkle index root {stored} does not match log ({expected}); run `repair`"
        ));
    }
    ledger.close()?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn seeded() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), LedgerConfig::testing()).unwrap();
        ledger.record("accounts", "a1", "name", "Checking").unwrap();
        ledger.record("accounts", "a2", "name", "Savings").unwrap();
        ledger.close().unwrap();
        dir
    }

    #[test]
    fn clean_file_passes() {
        let dir = seeded();
        let result = verify(dir.path()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.records, 2);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn torn_tail_is_a_warning() {
        let dir = seeded();
        let mut log = OpenOptions::new()
            .append(true)
            .open(dir.path().join("messages.log"))
            .unwrap();
        log.write_all(b"LSML\x00").unwrap();
        drop(log);

        let result = verify(dir.path()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.records, 2);
        assert_eq!(result.torn_bytes, 5);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(verify(dir.path()).is_err());
    }
}
