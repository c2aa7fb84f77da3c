//! Dump log command implementation.

use ledgersync_core::{scan_log, LogEntry, Origin};
use ledgersync_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// Mutation log record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Position in the log.
    pub seq: usize,
    /// Where the message came from.
    pub origin: Origin,
    /// Message timestamp.
    pub timestamp: String,
    /// Dataset (table).
    pub dataset: String,
    /// Row id.
    pub row: String,
    /// Column name.
    pub column: String,
    /// Value, rendered.
    pub value: String,
}

impl LogRecordInfo {
    fn new(seq: usize, entry: &LogEntry) -> Self {
        let message = &entry.message;
        Self {
            seq,
            origin: entry.origin,
            timestamp: message.timestamp.to_string(),
            dataset: message.dataset.clone(),
            row: message.row.clone(),
            column: message.column.clone(),
            value: message.value.to_string(),
        }
    }
}

/// Runs the dump-log command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let backend = FileBackend::open(&super::log_path(path)?)?;
    let scan = scan_log(&backend)?;
    let records: Vec<_> = scan
        .entries
        .iter()
        .enumerate()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(seq, entry)| LogRecordInfo::new(seq, entry))
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
            if let Some(issue) = &scan.tail_issue {
                println!();
                println!("Log ends early: {issue}");
            }
        }
    }

    Ok(())
}

fn print_text_output(records: &[LogRecordInfo]) {
    println!("Mutation Log Records");
    println!("====================");
    println!();

    for record in records {
        let origin = match record.origin {
            Origin::Local => "local ",
            Origin::Remote => "remote",
        };
        println!(
            "[{:>6}] {} {} {}/{}/{} = {}",
            record.seq,
            record.timestamp,
            origin,
            record.dataset,
            record.row,
            record.column,
            record.value
        );
    }

    println!();
    println!("Total: {} records", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_core::{Ledger, LedgerConfig};

    #[test]
    fn record_info_renders_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), LedgerConfig::testing()).unwrap();
        ledger.record("categories", "cat1", "name", "Groceries").unwrap();
        ledger.close().unwrap();

        let backend = FileBackend::open(&dir.path().join("messages.log")).unwrap();
        let scan = scan_log(&backend).unwrap();
        let info = LogRecordInfo::new(0, &scan.entries[0]);
        assert_eq!(info.origin, Origin::Local);
        assert_eq!(info.dataset, "categories");
        assert_eq!(info.column, "name");

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["origin"], "local");
        assert_eq!(json["row"], "cat1");
    }
}
