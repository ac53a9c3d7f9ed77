//! Document tables over a journal backend.

use crate::backend::JournalBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::journal::{decode_frames, encode_frame, JournalEntry};
use crate::memory::InMemoryBackend;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A stored row: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// The local store contract consumed by the sync engine.
///
/// A store holds named tables of documents keyed by id, plus a small set
/// of metadata slots for state that lives outside the entity tables (the
/// pull cursor, for instance).
///
/// # Invariants
///
/// - every mutating call is durable before it returns
/// - `put` is insert-or-replace
/// - `update` merges top-level fields and never creates a row
/// - `scan` returns rows in id order
pub trait LocalStore: Send + Sync {
    /// Returns the row `id` of `table`.
    fn get(&self, table: &str, id: &str) -> StorageResult<Option<Document>>;

    /// Inserts or replaces the row `id` of `table`.
    fn put(&self, table: &str, id: &str, doc: Document) -> StorageResult<()>;

    /// Overwrites the given top-level fields of an existing row.
    ///
    /// Returns `false` if the row does not exist.
    fn update(&self, table: &str, id: &str, fields: Document) -> StorageResult<bool>;

    /// Removes the row `id` of `table`.
    ///
    /// Returns `false` if the row did not exist.
    fn delete(&self, table: &str, id: &str) -> StorageResult<bool>;

    /// Returns every row of `table` in id order.
    fn scan(&self, table: &str) -> StorageResult<Vec<Document>>;

    /// Returns the rows of `table` accepted by `predicate`, in id order.
    ///
    /// Range queries (rows changed after a cursor, for instance) go
    /// through here.
    fn find_where(
        &self,
        table: &str,
        predicate: &dyn Fn(&Document) -> bool,
    ) -> StorageResult<Vec<Document>> {
        Ok(self
            .scan(table)?
            .into_iter()
            .filter(|doc| predicate(doc))
            .collect())
    }

    /// Returns the rows of `table` whose `field` equals `value`.
    fn find_eq(&self, table: &str, field: &str, value: &Value) -> StorageResult<Vec<Document>> {
        self.find_where(table, &|doc| doc.get(field) == Some(value))
    }

    /// Returns the number of rows in `table`.
    fn count(&self, table: &str) -> StorageResult<usize> {
        Ok(self.scan(table)?.len())
    }

    /// Removes every row of `table`.
    fn clear(&self, table: &str) -> StorageResult<()>;

    /// Reads a metadata slot.
    fn get_meta(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes a metadata slot.
    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes a metadata slot.
    fn remove_meta(&self, key: &str) -> StorageResult<()>;
}

/// Configuration for a [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Journal frames below which automatic compaction never runs.
    pub auto_compact_min_frames: usize,
    /// Compact once frames exceed this multiple of live rows.
    pub auto_compact_ratio: usize,
}

impl StoreConfig {
    /// Disables automatic compaction.
    pub fn without_auto_compaction() -> Self {
        Self {
            auto_compact_min_frames: usize::MAX,
            auto_compact_ratio: usize::MAX,
        }
    }

    /// Sets the minimum frame count before automatic compaction.
    pub fn with_auto_compact_min_frames(mut self, frames: usize) -> Self {
        self.auto_compact_min_frames = frames;
        self
    }

    /// Sets the frames-per-live-row ratio that triggers compaction.
    pub fn with_auto_compact_ratio(mut self, ratio: usize) -> Self {
        self.auto_compact_ratio = ratio;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_compact_min_frames: 1024,
            auto_compact_ratio: 4,
        }
    }
}

struct Inner<B> {
    backend: B,
    tables: BTreeMap<String, BTreeMap<String, Document>>,
    meta: BTreeMap<String, String>,
    frames: usize,
}

impl<B: JournalBackend> Inner<B> {
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Put { table, id, doc } => {
                self.tables.entry(table).or_default().insert(id, doc);
            }
            JournalEntry::Patch { table, id, fields } => {
                if let Some(doc) = self.tables.get_mut(&table).and_then(|t| t.get_mut(&id)) {
                    doc.extend(fields);
                }
            }
            JournalEntry::Delete { table, id } => {
                if let Some(rows) = self.tables.get_mut(&table) {
                    rows.remove(&id);
                }
            }
            JournalEntry::Clear { table } => {
                self.tables.remove(&table);
            }
            JournalEntry::SetMeta { key, value } => {
                self.meta.insert(key, value);
            }
            JournalEntry::RemoveMeta { key } => {
                self.meta.remove(&key);
            }
        }
    }

    fn live_rows(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum::<usize>() + self.meta.len()
    }

    fn contains(&self, table: &str, id: &str) -> bool {
        self.tables.get(table).is_some_and(|t| t.contains_key(id))
    }

    fn write(&mut self, entry: JournalEntry) -> StorageResult<()> {
        let frame = encode_frame(&entry)?;
        let len = self.backend.size()?;
        if let Err(e) = self
            .backend
            .append(&frame)
            .and_then(|_| self.backend.sync())
        {
            // a frame that reached the journal would come back on replay
            if let Err(undo) = self.backend.truncate(len) {
                tracing::error!(error = %undo, "failed to roll back journal after write error");
            }
            return Err(e);
        }
        self.frames += 1;
        self.apply(entry);
        Ok(())
    }

    fn snapshot(&self) -> StorageResult<(Vec<u8>, usize)> {
        let mut bytes = Vec::new();
        let mut frames = 0;
        for (table, rows) in &self.tables {
            for (id, doc) in rows {
                bytes.extend(encode_frame(&JournalEntry::Put {
                    table: table.clone(),
                    id: id.clone(),
                    doc: doc.clone(),
                })?);
                frames += 1;
            }
        }
        for (key, value) in &self.meta {
            bytes.extend(encode_frame(&JournalEntry::SetMeta {
                key: key.clone(),
                value: value.clone(),
            })?);
            frames += 1;
        }
        Ok((bytes, frames))
    }

    fn compact(&mut self) -> StorageResult<()> {
        let before = self.frames;
        let (bytes, frames) = self.snapshot()?;
        self.backend.replace(&bytes)?;
        self.frames = frames;
        tracing::debug!(before, after = frames, "compacted journal");
        Ok(())
    }
}

/// A [`LocalStore`] backed by a journal.
///
/// All rows are held in memory; the journal is the durable record of
/// every mutation and is replayed on open. Each write appends one frame
/// and syncs the backend before the in-memory tables change. A write whose
/// append or sync fails is truncated off the journal again, so it neither
/// shows up now nor on the next open.
///
/// # Example
///
/// ```rust
/// use stockroom_storage::{LocalStore, MemoryStore};
/// use serde_json::json;
///
/// let store = MemoryStore::in_memory();
/// let doc = json!({ "id": "p1", "name": "Widget" });
/// store.put("products", "p1", doc.as_object().cloned().unwrap()).unwrap();
/// assert!(store.get("products", "p1").unwrap().is_some());
/// ```
pub struct DocumentStore<B: JournalBackend> {
    inner: RwLock<Inner<B>>,
    config: StoreConfig,
}

/// A store that lives only in memory.
pub type MemoryStore = DocumentStore<InMemoryBackend>;

/// A store persisted to a journal file.
pub type FileStore = DocumentStore<FileBackend>;

impl<B: JournalBackend> DocumentStore<B> {
    /// Opens a store over `backend`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or is corrupted.
    pub fn open(backend: B) -> StorageResult<Self> {
        Self::open_with_config(backend, StoreConfig::default())
    }

    /// Opens a store with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or is corrupted.
    pub fn open_with_config(mut backend: B, config: StoreConfig) -> StorageResult<Self> {
        let bytes = backend.read_all()?;
        let replay = decode_frames(&bytes)?;

        if replay.has_torn_tail(bytes.len() as u64) {
            tracing::warn!(
                valid_len = replay.valid_len,
                journal_len = bytes.len(),
                "discarding torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        let mut inner = Inner {
            backend,
            tables: BTreeMap::new(),
            meta: BTreeMap::new(),
            frames: replay.entries.len(),
        };
        for entry in replay.entries {
            inner.apply(entry);
        }

        Ok(Self {
            inner: RwLock::new(inner),
            config,
        })
    }

    /// Rewrites the journal as one frame per live row and metadata slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the new journal cannot be written.
    pub fn compact(&self) -> StorageResult<()> {
        self.inner.write().compact()
    }

    /// Returns the number of frames currently in the journal.
    pub fn frame_count(&self) -> usize {
        self.inner.read().frames
    }

    /// Returns the names of all non-empty tables.
    pub fn tables(&self) -> Vec<String> {
        self.inner
            .read()
            .tables
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn write(&self, entry: JournalEntry) -> StorageResult<()> {
        self.write_if(entry, |_| true).map(|_| ())
    }

    /// Writes `entry` only if `precondition` holds, checked under the
    /// same lock as the write.
    fn write_if(
        &self,
        entry: JournalEntry,
        precondition: impl FnOnce(&Inner<B>) -> bool,
    ) -> StorageResult<bool> {
        let mut inner = self.inner.write();
        if !precondition(&inner) {
            return Ok(false);
        }
        inner.write(entry)?;

        let frames = inner.frames;
        if frames >= self.config.auto_compact_min_frames
            && frames / inner.live_rows().max(1) > self.config.auto_compact_ratio
        {
            inner.compact()?;
        }
        Ok(true)
    }
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                backend: InMemoryBackend::new(),
                tables: BTreeMap::new(),
                meta: BTreeMap::new(),
                frames: 0,
            }),
            config: StoreConfig::default(),
        }
    }
}

impl FileStore {
    /// Opens (or creates) a journal file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its journal is corrupted.
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        Self::open(FileBackend::open_with_create_dirs(path)?)
    }
}

impl<B: JournalBackend> LocalStore for DocumentStore<B> {
    fn get(&self, table: &str, id: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .inner
            .read()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    fn put(&self, table: &str, id: &str, doc: Document) -> StorageResult<()> {
        self.write(JournalEntry::Put {
            table: table.to_string(),
            id: id.to_string(),
            doc,
        })
    }

    fn update(&self, table: &str, id: &str, fields: Document) -> StorageResult<bool> {
        self.write_if(
            JournalEntry::Patch {
                table: table.to_string(),
                id: id.to_string(),
                fields,
            },
            |inner| inner.contains(table, id),
        )
    }

    fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        self.write_if(
            JournalEntry::Delete {
                table: table.to_string(),
                id: id.to_string(),
            },
            |inner| inner.contains(table, id),
        )
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<Document>> {
        Ok(self
            .inner
            .read()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        Ok(self.inner.read().tables.get(table).map_or(0, BTreeMap::len))
    }

    fn clear(&self, table: &str) -> StorageResult<()> {
        self.write(JournalEntry::Clear {
            table: table.to_string(),
        })
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.inner.read().meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.write(JournalEntry::SetMeta {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn remove_meta(&self, key: &str) -> StorageResult<()> {
        self.write(JournalEntry::RemoveMeta {
            key: key.to_string(),
        })
    }
}
