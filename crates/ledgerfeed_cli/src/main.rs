//! Ledgerfeed CLI
//!
//! Command-line tools for the ledger change feed.
//!
//! # Commands
//!
//! - `process` - Run an invocation document through the projection pipeline
//! - `decode` - Print every record of an invocation document as JSON
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ledger change feed tools.
#[derive(Parser)]
#[command(name = "ledgerfeed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an invocation document through the projection pipeline
    Process {
        /// Stream event JSON file
        #[arg(short, long)]
        event: PathBuf,

        /// Key-value table receiving projections
        #[arg(long, env = "TABLE_NAME", default_value = "BicycleLicence")]
        table_name: String,

        /// Key-value store endpoint (in-memory store when absent)
        #[arg(long, env = "DYNAMODB_ENDPOINT")]
        dynamodb_endpoint: Option<String>,

        /// Search domain endpoint (in-memory index when absent)
        #[arg(long, env = "ELASTICSEARCH_DOMAIN")]
        search_endpoint: Option<String>,

        /// Search index receiving projections
        #[arg(long, default_value = "licence")]
        index: String,

        /// Only project revisions of this ledger table (repeatable)
        #[arg(long = "only-table")]
        only_tables: Vec<String>,

        /// Rename a field in the key-value projection, as FROM=TO (repeatable)
        #[arg(long = "kv-rename")]
        kv_renames: Vec<String>,

        /// Rename a field in the search projection, as FROM=TO (repeatable)
        #[arg(long = "search-rename")]
        search_renames: Vec<String>,

        /// Maximum number of records processed concurrently
        #[arg(long, default_value_t = ledgerfeed_engine::DEFAULT_MAX_IN_FLIGHT)]
        max_in_flight: usize,

        /// Time budget for the batch in milliseconds
        #[arg(long)]
        time_budget_ms: Option<u64>,

        /// Skip aggregate checksum verification
        #[arg(long)]
        no_verify_checksums: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print every record of an invocation document as JSON
    Decode {
        /// Stream event JSON file
        #[arg(short, long)]
        event: PathBuf,

        /// Skip aggregate checksum verification
        #[arg(long)]
        no_verify_checksums: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Process {
            event,
            table_name,
            dynamodb_endpoint,
            search_endpoint,
            index,
            only_tables,
            kv_renames,
            search_renames,
            max_in_flight,
            time_budget_ms,
            no_verify_checksums,
            format,
        } => {
            let options = commands::process::Options {
                table_name,
                dynamodb_endpoint,
                search_endpoint,
                index,
                only_tables,
                kv_renames,
                search_renames,
                max_in_flight,
                time_budget_ms,
                verify_checksums: !no_verify_checksums,
            };
            commands::process::run(&event, options, &format).await?;
        }
        Commands::Decode {
            event,
            no_verify_checksums,
        } => {
            commands::decode::run(&event, !no_verify_checksums)?;
        }
        Commands::Version => {
            println!("Ledgerfeed CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Ledgerfeed Engine v{}", ledgerfeed_engine::VERSION);
        }
    }

    Ok(())
}
