//! Repair command implementation.

use ledgersync_core::{Ledger, LedgerConfig, TrieHash};
use std::path::Path;

/// Runs the repair command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    super::log_path(path)?;
    let (before, after, messages) = repair(path)?;

    println!("Repaired budgeting file at {}", path.display());
    println!("  Messages:        {messages}");
    println!("  Root before:     {before}");
    println!("  Root after:      {after}");
    if before == after {
        println!("  Merkle index was already consistent");
    }
    Ok(())
}

fn repair(path: &Path) -> Result<(TrieHash, TrieHash, usize), Box<dyn std::error::Error>> {
    let mut ledger = Ledger::open(path, LedgerConfig::default())?;
    let before = ledger.root_hash();
    ledger.replay_all()?;
    let after = ledger.repair()?;
    let messages = ledger.message_count();
    ledger.close()?;
    Ok((before, after, messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reattaches_after_reset() {
        let dir = tempfile::tempdir().unwrap();
        let root = {
            let mut ledger = Ledger::open(dir.path(), LedgerConfig::testing()).unwrap();
            ledger.record("accounts", "a1", "name", "Checking").unwrap();
            let root = ledger.root_hash();
            ledger.reset_sync_state().unwrap();
            ledger.close().unwrap();
            root
        };

        let (before, after, messages) = repair(dir.path()).unwrap();
        assert!(before.is_zero());
        assert_eq!(after, root);
        assert_eq!(messages, 1);

        let ledger = Ledger::open(dir.path(), LedgerConfig::testing()).unwrap();
        assert_eq!(ledger.root_hash(), root);
    }
}
