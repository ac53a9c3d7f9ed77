//! Outbox items and the coalescing rules.
//!
//! At most one item exists per `(entity type, entity id)`. When a new
//! local mutation arrives for an id that is already queued, [`coalesce`]
//! decides what happens to the queued item:
//!
//! | queued   | new      | result                                   |
//! |----------|----------|------------------------------------------|
//! | create   | delete   | item removed, the server never saw it    |
//! | create   | other    | stays `create`, data replaced            |
//! | update   | any      | takes the new operation, data replaced   |
//! | delete   | any      | takes the new operation, data replaced   |
//!
//! Every surviving item gets the mutation's timestamp.

use crate::entity::{Document, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of failed push attempts after which an item is stranded.
pub const MAX_PUSH_ATTEMPTS: u32 = 3;

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// The entity was created locally.
    Create,
    /// The entity was modified locally.
    Update,
    /// The entity was deleted locally.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Update => f.write_str("update"),
            Operation::Delete => f.write_str("delete"),
        }
    }
}

/// A local mutation about to enter the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Entity table.
    pub kind: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Mutation kind.
    pub operation: Operation,
    /// Record snapshot, in the local field convention.
    pub data: Document,
}

/// A pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxItem {
    /// Item id.
    pub id: String,
    /// Entity table.
    pub entity_type: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Operation to replay.
    pub operation: Operation,
    /// Record snapshot taken at mutation time.
    pub data: Document,
    /// Enqueue time; the FIFO order key.
    pub timestamp: DateTime<Utc>,
    /// Failed push attempts so far.
    #[serde(default)]
    pub retry_count: u32,
}

impl OutboxItem {
    /// Creates a fresh item for `mutation`.
    pub fn new(mutation: Mutation, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type: mutation.kind,
            entity_id: mutation.entity_id,
            operation: mutation.operation,
            data: mutation.data,
            timestamp: now,
            retry_count: 0,
        }
    }

    /// Returns true once the item has used up its push attempts.
    pub fn is_stranded(&self, max_attempts: u32) -> bool {
        self.retry_count >= max_attempts
    }
}

/// Outcome of applying a mutation to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Coalesced {
    /// No item was queued for this entity; queue this one.
    Insert(OutboxItem),
    /// Overwrite the queued item with this one.
    Replace(OutboxItem),
    /// Drop the queued item with this id.
    Remove(String),
}

/// Applies the coalescing rules to the item queued for the same entity.
pub fn coalesce(existing: Option<&OutboxItem>, mutation: Mutation, now: DateTime<Utc>) -> Coalesced {
    let Some(existing) = existing else {
        return Coalesced::Insert(OutboxItem::new(mutation, now));
    };

    let operation = match (existing.operation, mutation.operation) {
        (Operation::Create, Operation::Delete) => return Coalesced::Remove(existing.id.clone()),
        (Operation::Create, _) => Operation::Create,
        (_, new) => new,
    };

    Coalesced::Replace(OutboxItem {
        operation,
        data: mutation.data,
        timestamp: now,
        ..existing.clone()
    })
}
