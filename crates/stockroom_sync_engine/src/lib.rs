//! # Stockroom Sync Engine
//!
//! Offline-first synchronization between a local document store and a
//! remote backend.
//!
//! This crate provides:
//! - A durable outbox of local mutations with coalescing
//! - Push (drain the outbox) and pull (merge remote deltas by version)
//! - An online-status monitor with an optional heartbeat probe and wake
//!   detection
//! - An orchestrator that schedules and single-flights sync cycles
//! - In-memory and PostgREST-style remote implementations
//!
//! ## Architecture
//!
//! ```text
//! EntityRepository --> Outbox --> SyncEngine::push --> RemoteStore
//!                                 SyncEngine::pull <--  RemoteStore
//! OnlineMonitor, Outbox count --> SyncOrchestrator --> SyncEngine
//! ```
//!
//! A full cycle pushes before it pulls, so a device never mistakes its
//! own writes for external changes.
//!
//! ## Key Invariants
//!
//! - At most one outbox item per entity
//! - Outbox items are pushed one at a time, oldest first
//! - Pushes are idempotent upserts; deletions are soft
//! - Conflicts are decided by version; a tie keeps the local row
//! - At most one sync cycle runs at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod monitor;
mod orchestrator;
mod outbox;
mod remote;
mod repository;

pub use config::{ProbeConfig, SyncConfig};
pub use engine::{PullReport, PushReport, SyncEngine, SyncReport};
pub use error::{RemoteError, SyncError, SyncResult};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RestRemote};
pub use monitor::{OnlineMonitor, ReachabilityProbe, TcpProbe, WAKE_THRESHOLD};
pub use orchestrator::{
    LastSyncResult, OrchestratorHandle, SyncOrchestrator, SyncSnapshot, SyncState, Trigger,
    LAST_SYNC_KEY,
};
pub use outbox::{Outbox, OUTBOX_TABLE};
pub use remote::{MemoryRemote, RemoteCall, RemoteResult, RemoteStore};
pub use repository::EntityRepository;
