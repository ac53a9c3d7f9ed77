//! Journal backend trait definition.

use crate::error::StorageResult;

/// A low-level journal backend for the document store.
///
/// Backends are **opaque byte stores**. They append, read back and
/// atomically replace bytes; the store owns the frame format and never
/// expects the backend to understand documents or tables.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended since the last `replace`
/// - `sync` makes all appended data survive process termination
/// - `replace` is atomic: after a crash the journal holds either the old
///   content or the new content, never a mix
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For tests and ephemeral stores
/// - [`super::FileBackend`] - For persistent storage
pub trait JournalBackend: Send + Sync {
    /// Reads the entire journal.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the journal.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Syncs all appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the journal in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the journal to `new_size` bytes.
    ///
    /// Used to drop a torn tail frame left behind by a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole journal with `data`.
    ///
    /// Used by compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the new content cannot be written durably.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
