//! Outbox listing and clearing.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use stockroom_storage::LocalStore;
use stockroom_sync_engine::Outbox;
use stockroom_sync_protocol::{EntityKind, Operation, OutboxItem, MAX_PUSH_ATTEMPTS};

/// One queued mutation, without its snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRow {
    /// Item id.
    pub id: String,
    /// Entity table.
    pub entity_type: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Operation to replay.
    pub operation: Operation,
    /// Enqueue time (RFC 3339).
    pub timestamp: String,
    /// Failed push attempts.
    pub retry_count: u32,
    /// True once the item is no longer retried.
    pub stranded: bool,
}

impl From<OutboxItem> for OutboxRow {
    fn from(item: OutboxItem) -> Self {
        Self {
            stranded: item.is_stranded(MAX_PUSH_ATTEMPTS),
            id: item.id,
            entity_type: item.entity_type,
            entity_id: item.entity_id,
            operation: item.operation,
            timestamp: item.timestamp.to_rfc3339(),
            retry_count: item.retry_count,
        }
    }
}

/// Runs the outbox listing.
pub fn run(
    path: &Path,
    kind: Option<EntityKind>,
    stranded_only: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn LocalStore> = open_store(path)?;
    let rows = list(store, kind, stranded_only)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            if rows.is_empty() {
                println!("Outbox is empty");
            }
            for row in &rows {
                println!(
                    "{}  {:<7} {:<16} {}  attempts={}{}",
                    row.timestamp,
                    row.operation,
                    row.entity_type,
                    row.entity_id,
                    row.retry_count,
                    if row.stranded { " (stranded)" } else { "" }
                );
                println!("    item {}", row.id);
            }
        }
    }

    Ok(())
}

/// Lists queued items, oldest first.
pub fn list(
    store: Arc<dyn LocalStore>,
    kind: Option<EntityKind>,
    stranded_only: bool,
) -> Result<Vec<OutboxRow>, Box<dyn std::error::Error>> {
    let outbox = Outbox::new(store)?;
    let items = match kind {
        Some(kind) => outbox.by_kind(kind)?,
        None => outbox.pending()?,
    };

    Ok(items
        .into_iter()
        .filter(|item| !stranded_only || item.is_stranded(MAX_PUSH_ATTEMPTS))
        .map(OutboxRow::from)
        .collect())
}

/// Drops every queued item.
pub fn clear(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn LocalStore> = open_store(path)?;
    let outbox = Outbox::new(store)?;
    let dropped = outbox.pending_count()?;
    outbox.clear()?;
    tracing::warn!(dropped, "cleared outbox");
    println!("Dropped {} queued mutations", dropped);
    Ok(())
}
