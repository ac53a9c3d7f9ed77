//! Values exchanged with the remote store.

use crate::entity::{Document, EntityKind, EntityRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

/// Opaque caller identity attached to every remote call.
///
/// The sync engine never acquires or refreshes it.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated user.
    pub user_id: String,
    /// Tenant the user is working in.
    pub workspace_id: String,
    /// Bearer token for the remote.
    pub access_token: String,
}

impl Identity {
    /// Creates an identity.
    pub fn new(
        user_id: impl Into<String>,
        workspace_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("workspace_id", &self.workspace_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// A request for remote rows changed after a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullQuery {
    /// Table to read.
    pub kind: EntityKind,
    /// Tenant scope.
    pub workspace_id: String,
    /// Exclusive lower bound on `updated_at`.
    pub since: DateTime<Utc>,
}

impl PullQuery {
    /// Start of time, used when no cursor has been persisted yet.
    pub fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from(std::time::UNIX_EPOCH)
    }
}

/// A remote tombstone write.
///
/// Deletions never remove a remote row; they flip `is_deleted` so other
/// replicas observe the deletion through pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDelete {
    /// Entity id.
    pub id: String,
    /// New modification time.
    pub updated_at: DateTime<Utc>,
    /// Version of the local tombstone.
    pub version: u64,
}

impl SoftDelete {
    /// Builds the patch from a deleted record snapshot.
    pub fn from_record(record: &EntityRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            updated_at: now,
            version: record.version,
        }
    }

    /// Returns the remote columns this patch sets.
    pub fn to_row(&self) -> Document {
        let mut row = Document::new();
        row.insert("is_deleted".into(), Value::Bool(true));
        row.insert("updated_at".into(), Value::String(self.updated_at.to_rfc3339()));
        row.insert("version".into(), Value::from(self.version));
        row
    }
}
