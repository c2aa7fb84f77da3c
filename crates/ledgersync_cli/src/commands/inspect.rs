//! Inspect command implementation.

use ledgersync_core::{Ledger, LedgerConfig, Origin, SnapshotStatus};
use serde::Serialize;
use std::path::Path;

/// Budgeting file inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Budgeting file path.
    pub path: String,
    /// Node id of this device.
    pub node: String,
    /// Last timestamp issued or observed by the clock.
    pub clock: String,
    /// Newest timestamp known to be on the relay.
    pub watermark: Option<String>,
    /// Mutation log size in bytes.
    pub log_size: u64,
    /// Messages recorded on this device.
    pub local_messages: usize,
    /// Messages pulled from the relay.
    pub remote_messages: usize,
    /// Fields with a value.
    pub fields: usize,
    /// Merkle root hash, hex.
    pub root_hash: String,
    /// State of the snapshot at open.
    pub snapshot: String,
    /// Key records.
    pub keys: Vec<KeyInfo>,
}

/// A stored key record.
#[derive(Debug, Serialize)]
pub struct KeyInfo {
    /// Key id.
    pub id: String,
    /// Whether new messages are sealed with it.
    pub active: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log_size = super::log_path(path)?.metadata()?.len();
    let ledger = Ledger::open(path, LedgerConfig::default())?;
    let result = inspect(path, &ledger, log_size);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    ledger.close()?;
    Ok(())
}

fn inspect(path: &Path, ledger: &Ledger, log_size: u64) -> InspectResult {
    let local_messages = ledger
        .messages()
        .filter(|(_, origin)| *origin == Origin::Local)
        .count();
    let active = ledger.keyring().active_key_id();

    InspectResult {
        path: path.display().to_string(),
        node: ledger.node().to_string(),
        clock: ledger.clock_floor().to_string(),
        watermark: ledger.watermark().map(|w| w.to_string()),
        log_size,
        local_messages,
        remote_messages: ledger.message_count() - local_messages,
        fields: ledger.replica().len(),
        root_hash: ledger.root_hash().to_string(),
        snapshot: match &ledger.recovery().snapshot {
            SnapshotStatus::Loaded => "loaded".to_string(),
            SnapshotStatus::Missing => "missing (rebuilt from log)".to_string(),
            SnapshotStatus::Discarded(why) => format!("discarded (rebuilt from log): {why}"),
        },
        keys: ledger
            .keyring()
            .records()
            .iter()
            .map(|r| KeyInfo {
                id: r.id.to_string(),
                active: Some(r.id) == active,
            })
            .collect(),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("ledgersync Budgeting File");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Clock:");
    println!("  Node:      {}", result.node);
    println!("  Clock:     {}", result.clock);
    println!(
        "  Watermark: {}",
        result.watermark.as_deref().unwrap_or("(never synced)")
    );
    println!();
    println!("Messages:");
    println!("  Local:     {}", result.local_messages);
    println!("  Remote:    {}", result.remote_messages);
    println!("  Fields:    {}", result.fields);
    println!("  Log size:  {}", format_size(result.log_size));
    println!();
    println!("Merkle root: {}", result.root_hash);
    println!("Snapshot:    {}", result.snapshot);

    println!();
    if result.keys.is_empty() {
        println!("Keys: none");
    } else {
        println!("Keys:");
        for key in &result.keys {
            let marker = if key.active { " (active)" } else { "" };
            println!("  {}{}", key.id, marker);
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
