//! CLI command implementations.

pub mod compact;
pub mod cursor;
pub mod inspect;
pub mod outbox;
pub mod retry;

use std::path::Path;
use std::sync::Arc;
use stockroom_storage::FileStore;

/// Opens an existing store journal.
///
/// Unlike [`FileStore::open_path`], a missing file is an error rather
/// than a fresh empty store.
pub fn open_store(path: &Path) -> Result<Arc<FileStore>, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No store found at {:?}", path).into());
    }
    Ok(Arc::new(FileStore::open_path(path)?))
}
