//! Remote store abstraction.

use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use stockroom_sync_protocol::{Document, EntityKind, Identity, PullQuery, SoftDelete};

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// The remote backend the engine reconciles with.
///
/// Rows cross this boundary in the remote (snake_case) convention. Every
/// call carries the caller identity; implementations scope reads to
/// `identity.workspace_id` or the query's tenant.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Inserts or replaces the row keyed by its `id` column.
    ///
    /// Repeating the call with the same row must not create a duplicate.
    async fn upsert(&self, identity: &Identity, kind: EntityKind, row: Document) -> RemoteResult<()>;

    /// Marks a row as deleted without removing it.
    async fn soft_delete(
        &self,
        identity: &Identity,
        kind: EntityKind,
        patch: &SoftDelete,
    ) -> RemoteResult<()>;

    /// Returns the tenant's rows updated strictly after `query.since`.
    async fn fetch_since(&self, identity: &Identity, query: &PullQuery) -> RemoteResult<Vec<Document>>;
}

/// A call observed by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// An upsert of entity `id`.
    Upsert {
        /// Entity table.
        kind: EntityKind,
        /// Entity id.
        id: String,
    },
    /// A soft-delete of entity `id`.
    SoftDelete {
        /// Entity table.
        kind: EntityKind,
        /// Entity id.
        id: String,
    },
    /// A pull of one table.
    Fetch {
        /// Entity table.
        kind: EntityKind,
    },
}

#[derive(Default)]
struct State {
    tables: BTreeMap<EntityKind, BTreeMap<String, Document>>,
    calls: Vec<RemoteCall>,
    failing_ids: HashMap<String, RemoteError>,
    failing_kinds: HashMap<EntityKind, RemoteError>,
    unreachable: bool,
}

impl State {
    fn check(&self, kind: EntityKind, id: Option<&str>) -> RemoteResult<()> {
        if self.unreachable {
            return Err(RemoteError::Transient("remote unreachable".into()));
        }
        if let Some(err) = self.failing_kinds.get(&kind) {
            return Err(err.clone());
        }
        if let Some(err) = id.and_then(|id| self.failing_ids.get(id)) {
            return Err(err.clone());
        }
        Ok(())
    }
}

/// An in-process remote store.
///
/// Tables hold rows in the remote convention. Every call is logged, and
/// failures can be injected per entity id, per table or for the whole
/// remote.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a row directly, as another client would.
    pub fn insert_row(&self, kind: EntityKind, row: Document) {
        let id = row_id(&row);
        self.state
            .lock()
            .tables
            .entry(kind)
            .or_default()
            .insert(id, row);
    }

    /// Returns the row `id` of `kind`.
    pub fn row(&self, kind: EntityKind, id: &str) -> Option<Document> {
        self.state.lock().tables.get(&kind)?.get(id).cloned()
    }

    /// Returns every row of `kind`.
    pub fn rows(&self, kind: EntityKind) -> Vec<Document> {
        self.state
            .lock()
            .tables
            .get(&kind)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the calls received so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Makes every write of entity `id` fail with `err`.
    pub fn fail_id(&self, id: impl Into<String>, err: RemoteError) {
        self.state.lock().failing_ids.insert(id.into(), err);
    }

    /// Makes every call on `kind` fail with `err`.
    pub fn fail_kind(&self, kind: EntityKind, err: RemoteError) {
        self.state.lock().failing_kinds.insert(kind, err);
    }

    /// Removes every injected failure.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.failing_ids.clear();
        state.failing_kinds.clear();
        state.unreachable = false;
    }

    /// Makes every call fail as if the network were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, _identity: &Identity, kind: EntityKind, row: Document) -> RemoteResult<()> {
        let id = row_id(&row);
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Upsert {
            kind,
            id: id.clone(),
        });
        state.check(kind, Some(&id))?;

        state
            .tables
            .entry(kind)
            .or_default()
            .entry(id)
            .and_modify(|existing| existing.extend(row.clone()))
            .or_insert(row);
        Ok(())
    }

    async fn soft_delete(
        &self,
        _identity: &Identity,
        kind: EntityKind,
        patch: &SoftDelete,
    ) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::SoftDelete {
            kind,
            id: patch.id.clone(),
        });
        state.check(kind, Some(&patch.id))?;

        if let Some(row) = state
            .tables
            .get_mut(&kind)
            .and_then(|rows| rows.get_mut(&patch.id))
        {
            row.extend(patch.to_row());
        }
        Ok(())
    }

    async fn fetch_since(&self, _identity: &Identity, query: &PullQuery) -> RemoteResult<Vec<Document>> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Fetch { kind: query.kind });
        state.check(query.kind, None)?;

        let workspace = Value::String(query.workspace_id.clone());
        Ok(state
            .tables
            .get(&query.kind)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.get("workspace_id") == Some(&workspace))
                    .filter(|row| updated_at(row).is_some_and(|at| at > query.since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn row_id(row: &Document) -> String {
    match row.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn updated_at(row: &Document) -> Option<DateTime<Utc>> {
    let raw = row.get("updated_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
