//! Cursor command implementation.

use super::open_store;
use chrono::{DateTime, Utc};
use std::path::Path;
use stockroom_storage::LocalStore;
use stockroom_sync_engine::LAST_SYNC_KEY;

/// Runs the cursor command.
pub fn run(path: &Path, reset: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    if reset {
        store.remove_meta(LAST_SYNC_KEY)?;
        tracing::info!("sync cursor reset");
        println!("Cursor reset; the next sync pulls every row");
        return Ok(());
    }

    match read(store.as_ref())? {
        Some(at) => println!("Last sync: {}", at.to_rfc3339()),
        None => println!("Last sync: never"),
    }
    Ok(())
}

/// Reads the pull cursor.
pub fn read(store: &dyn LocalStore) -> Result<Option<DateTime<Utc>>, Box<dyn std::error::Error>> {
    let Some(raw) = store.get_meta(LAST_SYNC_KEY)? else {
        return Ok(None);
    };
    let at = DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| format!("Invalid cursor {:?}: {}", raw, e))?;
    Ok(Some(at.with_timezone(&Utc)))
}
