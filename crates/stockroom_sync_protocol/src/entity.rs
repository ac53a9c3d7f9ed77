//! Entity kinds and records.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// The closed set of synchronized entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Inventory products.
    Products,
    /// Customers.
    Customers,
    /// Suppliers.
    Suppliers,
    /// Purchase orders.
    PurchaseOrders,
    /// Sales orders.
    SalesOrders,
    /// Invoices.
    Invoices,
    /// Workspace members.
    Users,
    /// Point-of-sale transactions.
    Sales,
    /// Product categories.
    Categories,
    /// Storage locations.
    Storages,
}

impl EntityKind {
    /// Every kind, in pull order.
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Products,
        EntityKind::Customers,
        EntityKind::Suppliers,
        EntityKind::PurchaseOrders,
        EntityKind::SalesOrders,
        EntityKind::Invoices,
        EntityKind::Users,
        EntityKind::Sales,
        EntityKind::Categories,
        EntityKind::Storages,
    ];

    /// Returns the table name, shared by the local and remote stores.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Customers => "customers",
            EntityKind::Suppliers => "suppliers",
            EntityKind::PurchaseOrders => "purchase_orders",
            EntityKind::SalesOrders => "sales_orders",
            EntityKind::Invoices => "invoices",
            EntityKind::Users => "users",
            EntityKind::Sales => "sales",
            EntityKind::Categories => "categories",
            EntityKind::Storages => "storages",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for EntityKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.table_name() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

/// Local replication state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Matches the last version acknowledged by the remote.
    Synced,
    /// Has local changes not yet acknowledged.
    #[default]
    Pending,
}

/// An entity row with its sync metadata.
///
/// Domain fields (`name`, `price`, ...) live in `fields`; the struct only
/// names the metadata the sync engine reasons about. Serialization uses
/// the local camelCase convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// Globally unique id.
    pub id: String,
    /// Owning tenant.
    pub workspace_id: String,
    /// Monotonic version counter, the only conflict arbiter.
    pub version: u64,
    /// Local replication state. Never sent to the remote.
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// When the remote last acknowledged this record. Never sent to the remote.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Tombstone flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time; the pull-window cursor.
    pub updated_at: DateTime<Utc>,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: Document,
}

impl EntityRecord {
    /// Creates a fresh, pending record at version 1.
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        fields: Document,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            version: 1,
            sync_status: SyncStatus::Pending,
            last_synced_at: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    /// Reads a record from a local document.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedRecord`] if a metadata field is
    /// missing or has the wrong type.
    pub fn from_document(doc: Document) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    /// Writes the record as a local document.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedRecord`] if the record does not
    /// serialize to a JSON object.
    pub fn to_document(&self) -> ProtocolResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            other => Err(ProtocolError::MalformedRecord(format!(
                "expected object, got {other}"
            ))),
        }
    }

    /// Marks the record as acknowledged by the remote.
    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.sync_status = SyncStatus::Synced;
        self.last_synced_at = Some(now);
    }

    /// Bumps the version and records a local modification.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
        self.sync_status = SyncStatus::Pending;
    }
}
