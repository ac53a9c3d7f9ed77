//! # Stockroom Storage
//!
//! Durable local document storage for the Stockroom sync engine.
//!
//! The crate has two layers:
//!
//! - **Journal backends** are opaque byte stores that only append, sync,
//!   truncate and atomically replace their contents.
//! - **[`DocumentStore`]** keeps named tables of JSON documents in memory
//!   and records every mutation as one frame in a backend journal, which
//!   is replayed when the store is opened.
//!
//! Consumers depend on the [`LocalStore`] trait, not on a concrete store.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral sessions
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use stockroom_storage::{LocalStore, MemoryStore};
//! use serde_json::json;
//!
//! let store = MemoryStore::in_memory();
//! store.set_meta("sync.last_sync_time", "2024-05-01T00:00:00Z").unwrap();
//!
//! let row = json!({ "id": "c1", "name": "Acme" });
//! store.put("customers", "c1", row.as_object().cloned().unwrap()).unwrap();
//! assert_eq!(store.count("customers").unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
pub mod journal;
mod memory;
mod store;

pub use backend::JournalBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use store::{Document, DocumentStore, FileStore, LocalStore, MemoryStore, StoreConfig};
