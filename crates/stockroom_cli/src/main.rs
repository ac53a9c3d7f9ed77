//! Stockroom CLI
//!
//! Maintenance tools for a file-backed Stockroom local store.
//!
//! # Commands
//!
//! - `inspect` - Display journal, table and sync statistics
//! - `outbox` - List queued mutations
//! - `retry` - Reset the attempt counter of stranded items
//! - `clear-outbox` - Drop every queued mutation
//! - `cursor` - Show or reset the pull cursor
//! - `compact` - Rewrite the journal as a snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stockroom_sync_protocol::EntityKind;
use tracing_subscriber::EnvFilter;

/// Stockroom local store tools.
#[derive(Parser)]
#[command(name = "stockroom")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store journal
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
    /// Display journal, table and sync statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued mutations, oldest first
    Outbox {
        /// Only show items of this entity type
        #[arg(short, long)]
        kind: Option<EntityKind>,

        /// Only show items that used up their push attempts
        #[arg(short, long)]
        stranded: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Make stranded items eligible for push again
    Retry {
        /// Outbox item id
        id: Option<String>,

        /// Reset every stranded item
        #[arg(long, conflicts_with = "id")]
        all_stranded: bool,
    },

    /// Drop every queued mutation
    ClearOutbox {
        /// Confirm that unsynced changes will be lost
        #[arg(long)]
        yes: bool,
    },

    /// Show the pull cursor
    Cursor {
        /// Forget the cursor so the next cycle pulls everything
        #[arg(long)]
        reset: bool,
    },

    /// Rewrite the journal as a snapshot of live rows
    Compact {
        /// Show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Outbox {
            kind,
            stranded,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for outbox")?;
            commands::outbox::run(&path, kind, stranded, &format)?;
        }
        Commands::Retry { id, all_stranded } => {
            let path = cli.path.ok_or("Store path required for retry")?;
            let target = match (id, all_stranded) {
                (Some(id), false) => commands::retry::Target::Item(id),
                (None, true) => commands::retry::Target::AllStranded,
                _ => return Err("Pass an item id or --all-stranded".into()),
            };
            commands::retry::run(&path, target)?;
        }
        Commands::ClearOutbox { yes } => {
            let path = cli.path.ok_or("Store path required for clear-outbox")?;
            if !yes {
                return Err("Refusing to drop unsynced changes without --yes".into());
            }
            commands::outbox::clear(&path)?;
        }
        Commands::Cursor { reset } => {
            let path = cli.path.ok_or("Store path required for cursor")?;
            commands::cursor::run(&path, reset)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Stockroom CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
