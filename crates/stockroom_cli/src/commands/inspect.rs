//! Inspect command implementation.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use stockroom_storage::{FileStore, LocalStore};
use stockroom_sync_engine::{Outbox, LAST_SYNC_KEY, OUTBOX_TABLE};
use stockroom_sync_protocol::MAX_PUSH_ATTEMPTS;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Frames in the journal.
    pub frame_count: usize,
    /// Entity tables and their row counts.
    pub tables: Vec<TableStats>,
    /// Queued mutations.
    pub pending: usize,
    /// Queued mutations that used up their push attempts.
    pub stranded: usize,
    /// Pull cursor, if a cycle has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
}

/// Row count of a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Rows, soft-deleted ones included.
    pub rows: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let result = inspect(path, &store)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects statistics from an open store.
pub fn inspect(path: &Path, store: &Arc<FileStore>) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let outbox = Outbox::new(store.clone())?;

    let mut tables = Vec::new();
    for name in store.tables() {
        if name == OUTBOX_TABLE {
            continue;
        }
        let rows = store.count(&name)?;
        tables.push(TableStats { name, rows });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: std::fs::metadata(path)?.len(),
        frame_count: store.frame_count(),
        tables,
        pending: outbox.pending_count()?,
        stranded: outbox.stranded(MAX_PUSH_ATTEMPTS)?.len(),
        last_sync_time: store.get_meta(LAST_SYNC_KEY)?,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Stockroom Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:   {}", format_size(result.journal_size));
    println!("  Frames: {}", result.frame_count);
    println!();
    println!("Tables:");
    if result.tables.is_empty() {
        println!("  (none)");
    }
    for table in &result.tables {
        println!("  {:<16} {} rows", table.name, table.rows);
    }
    println!();
    println!("Sync:");
    println!("  Pending:   {}", result.pending);
    println!("  Stranded:  {}", result.stranded);
    println!(
        "  Last sync: {}",
        result.last_sync_time.as_deref().unwrap_or("never")
    );
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
