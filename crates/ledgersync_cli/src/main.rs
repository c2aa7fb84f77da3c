//! ledgersync CLI
//!
//! Command-line tools for budgeting files on disk.
//!
//! # Commands
//!
//! - `inspect` - Display clock, watermark, keys and Merkle root
//! - `verify` - Check log checksums and the stored Merkle index
//! - `repair` - Rebuild the Merkle index and replica from the log
//! - `dump-log` - Dump mutation log records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ledgersync budgeting file tools.
#[derive(Parser)]
#[command(name = "ledgersync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the budgeting file directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display sync state and metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log checksums and the Merkle index
    Verify,

    /// Rebuild the Merkle index and replica from the log
    Repair,

    /// Dump mutation log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Budgeting file path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Budgeting file path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Repair => {
            let path = cli.path.ok_or("Budgeting file path required for repair")?;
            commands::repair::run(&path)?;
        }
        Commands::DumpLog { limit, format } => {
            let path = cli.path.ok_or("Budgeting file path required for dump-log")?;
            commands::dump_log::run(&path, limit, &format)?;
        }
        Commands::Version => {
            println!("ledgersync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ledgersync core v{}", ledgersync_core::VERSION);
        }
    }

    Ok(())
}
