//! # Stockroom Sync Protocol
//!
//! Pure types shared by the Stockroom sync engine and its remotes.
//!
//! This crate performs no I/O. It defines:
//!
//! - entity kinds and records with their sync metadata
//! - outbox items and the coalescing rules ([`coalesce`])
//! - the declared local/remote field mapping ([`FieldMap`])
//! - version-based conflict resolution ([`resolve`])
//! - caller identity and remote request values

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod mapping;
mod messages;
mod outbox;

pub use conflict::{resolve, Winner};
pub use entity::{Document, EntityKind, EntityRecord, SyncStatus};
pub use error::{Direction, ProtocolError, ProtocolResult};
pub use mapping::{FieldMap, FieldPair, LOCAL_ONLY_FIELDS, METADATA_FIELDS};
pub use messages::{Identity, PullQuery, SoftDelete};
pub use outbox::{coalesce, Coalesced, Mutation, Operation, OutboxItem, MAX_PUSH_ATTEMPTS};
