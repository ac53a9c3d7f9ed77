//! Local entity mutations.
//!
//! Every write lands in the local store first and is then recorded in
//! the outbox, so the application keeps working offline and the sync
//! engine replays the change once the remote is reachable.

use crate::error::{SyncError, SyncResult};
use crate::outbox::Outbox;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use stockroom_storage::LocalStore;
use stockroom_sync_protocol::{Document, EntityKind, EntityRecord, Mutation, Operation};

/// Creates, updates and deletes entity records on behalf of the application.
pub struct EntityRepository {
    store: Arc<dyn LocalStore>,
    outbox: Arc<Outbox>,
}

impl EntityRepository {
    /// Creates a repository writing to `store` and queueing into `outbox`.
    pub fn new(store: Arc<dyn LocalStore>, outbox: Arc<Outbox>) -> Self {
        Self { store, outbox }
    }

    /// Creates a record with a generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored or queued.
    pub fn create(
        &self,
        kind: EntityKind,
        workspace_id: &str,
        fields: Document,
    ) -> SyncResult<EntityRecord> {
        self.create_with_id(kind, &uuid::Uuid::new_v4().to_string(), workspace_id, fields)
    }

    /// Creates a record with a caller-chosen id.
    ///
    /// The record starts at version 1 and `pending`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored or queued.
    pub fn create_with_id(
        &self,
        kind: EntityKind,
        id: &str,
        workspace_id: &str,
        fields: Document,
    ) -> SyncResult<EntityRecord> {
        let record = EntityRecord::new(id, workspace_id, fields, Utc::now());
        self.save(kind, &record, Operation::Create)?;
        Ok(record)
    }

    /// Overwrites domain fields of an existing record.
    ///
    /// Bumps the version, refreshes `updatedAt` and marks the record `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the record does not exist.
    pub fn update(&self, kind: EntityKind, id: &str, fields: Document) -> SyncResult<EntityRecord> {
        let mut record = self.get(kind, id)?.ok_or_else(|| SyncError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        })?;
        record.fields.extend(fields);
        record.touch(Utc::now());
        self.save(kind, &record, Operation::Update)?;
        Ok(record)
    }

    /// Turns a record into a local tombstone.
    ///
    /// Returns `None` if the record does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the tombstone cannot be stored or queued.
    pub fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<Option<EntityRecord>> {
        let Some(mut record) = self.get(kind, id)? else {
            return Ok(None);
        };
        record.is_deleted = true;
        record.touch(Utc::now());
        self.save(kind, &record, Operation::Delete)?;
        Ok(Some(record))
    }

    /// Returns the record `id`, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored row is not a valid record.
    pub fn get(&self, kind: EntityKind, id: &str) -> SyncResult<Option<EntityRecord>> {
        self.store
            .get(kind.table_name(), id)?
            .map(|doc| EntityRecord::from_document(doc).map_err(SyncError::from))
            .transpose()
    }

    /// Returns the live records of a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list(&self, kind: EntityKind, workspace_id: &str) -> SyncResult<Vec<EntityRecord>> {
        let workspace = Value::String(workspace_id.to_string());
        let mut records = Vec::new();
        for doc in self
            .store
            .find_eq(kind.table_name(), "workspaceId", &workspace)?
        {
            let record = EntityRecord::from_document(doc)?;
            if !record.is_deleted {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Returns a tenant's records changed strictly after `since`, oldest
    /// first. Tombstones are included.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn changed_since(
        &self,
        kind: EntityKind,
        workspace_id: &str,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<EntityRecord>> {
        let docs = self.store.find_where(kind.table_name(), &|doc| {
            doc.get("workspaceId").and_then(Value::as_str) == Some(workspace_id)
                && doc
                    .get("updatedAt")
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .is_some_and(|at| at.with_timezone(&Utc) > since)
        })?;
        let mut records = docs
            .into_iter()
            .map(EntityRecord::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(records)
    }

    fn save(&self, kind: EntityKind, record: &EntityRecord, operation: Operation) -> SyncResult<()> {
        let data = record.to_document()?;
        self.store.put(kind.table_name(), &record.id, data.clone())?;
        self.outbox.enqueue(Mutation {
            kind,
            entity_id: record.id.clone(),
            operation,
            data,
        })
    }
}
