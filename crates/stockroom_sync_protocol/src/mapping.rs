//! Declared field mapping between the local and remote conventions.
//!
//! Local documents use camelCase keys, remote rows use snake_case
//! columns. Every key that crosses the wire is listed here as a
//! `(local, remote)` pair, so translation is total and reversible by
//! construction. Only top-level keys are renamed; nested values such as
//! order line items pass through untouched.

use crate::entity::{Document, EntityKind};
use crate::error::{Direction, ProtocolError, ProtocolResult};

/// A `(local, remote)` field-name pair.
pub type FieldPair = (&'static str, &'static str);

/// Local-only sync metadata, dropped on the way out.
pub const LOCAL_ONLY_FIELDS: [&str; 2] = ["syncStatus", "lastSyncedAt"];

/// Metadata columns shared by every entity table.
pub const METADATA_FIELDS: &[FieldPair] = &[
    ("id", "id"),
    ("workspaceId", "workspace_id"),
    ("version", "version"),
    ("isDeleted", "is_deleted"),
    ("createdAt", "created_at"),
    ("updatedAt", "updated_at"),
];

const PRODUCTS: &[FieldPair] = &[
    ("sku", "sku"),
    ("name", "name"),
    ("description", "description"),
    ("categoryId", "category_id"),
    ("category", "category"),
    ("storageId", "storage_id"),
    ("storageName", "storage_name"),
    ("price", "price"),
    ("costPrice", "cost_price"),
    ("quantity", "quantity"),
    ("minStockLevel", "min_stock_level"),
    ("unit", "unit"),
    ("currency", "currency"),
    ("barcode", "barcode"),
    ("imageUrl", "image_url"),
    ("canBeReturned", "can_be_returned"),
    ("returnRules", "return_rules"),
];

const CUSTOMERS: &[FieldPair] = &[
    ("name", "name"),
    ("email", "email"),
    ("phone", "phone"),
    ("address", "address"),
    ("city", "city"),
    ("country", "country"),
    ("notes", "notes"),
    ("defaultCurrency", "default_currency"),
    ("totalOrders", "total_orders"),
    ("totalSpent", "total_spent"),
    ("outstandingBalance", "outstanding_balance"),
    ("creditLimit", "credit_limit"),
];

const SUPPLIERS: &[FieldPair] = &[
    ("name", "name"),
    ("contactName", "contact_name"),
    ("email", "email"),
    ("phone", "phone"),
    ("address", "address"),
    ("city", "city"),
    ("country", "country"),
    ("defaultCurrency", "default_currency"),
    ("notes", "notes"),
    ("totalPurchases", "total_purchases"),
    ("totalSpent", "total_spent"),
    ("creditLimit", "credit_limit"),
];

const PURCHASE_ORDERS: &[FieldPair] = &[
    ("orderNumber", "order_number"),
    ("supplierId", "supplier_id"),
    ("supplierName", "supplier_name"),
    ("items", "items"),
    ("subtotal", "subtotal"),
    ("discount", "discount"),
    ("total", "total"),
    ("currency", "currency"),
    ("exchangeRate", "exchange_rate"),
    ("exchangeRateSource", "exchange_rate_source"),
    ("exchangeRateTimestamp", "exchange_rate_timestamp"),
    ("exchangeRates", "exchange_rates"),
    ("status", "status"),
    ("expectedDeliveryDate", "expected_delivery_date"),
    ("actualDeliveryDate", "actual_delivery_date"),
    ("isPaid", "is_paid"),
    ("paidAt", "paid_at"),
    ("paymentMethod", "payment_method"),
    ("notes", "notes"),
];

const SALES_ORDERS: &[FieldPair] = &[
    ("orderNumber", "order_number"),
    ("customerId", "customer_id"),
    ("customerName", "customer_name"),
    ("items", "items"),
    ("subtotal", "subtotal"),
    ("discount", "discount"),
    ("tax", "tax"),
    ("total", "total"),
    ("currency", "currency"),
    ("exchangeRate", "exchange_rate"),
    ("exchangeRateSource", "exchange_rate_source"),
    ("exchangeRateTimestamp", "exchange_rate_timestamp"),
    ("exchangeRates", "exchange_rates"),
    ("status", "status"),
    ("expectedDeliveryDate", "expected_delivery_date"),
    ("actualDeliveryDate", "actual_delivery_date"),
    ("isPaid", "is_paid"),
    ("paidAt", "paid_at"),
    ("paymentMethod", "payment_method"),
    ("reservedAt", "reserved_at"),
    ("shippingAddress", "shipping_address"),
    ("notes", "notes"),
];

const INVOICES: &[FieldPair] = &[
    ("invoiceid", "invoiceid"),
    ("orderId", "order_id"),
    ("customerId", "customer_id"),
    ("items", "items"),
    ("subtotal", "subtotal"),
    ("discount", "discount"),
    ("total", "total"),
    ("currency", "currency"),
    ("status", "status"),
    ("isSnapshot", "is_snapshot"),
    ("origin", "origin"),
    ("createdBy", "created_by"),
    ("cashierName", "cashier_name"),
    ("createdByName", "created_by_name"),
    ("printMetadata", "print_metadata"),
    ("sequenceId", "sequence_id"),
    ("printFormat", "print_format"),
];

const USERS: &[FieldPair] = &[
    ("email", "email"),
    ("name", "name"),
    ("role", "role"),
    ("profileUrl", "profile_url"),
    ("monthlyTarget", "monthly_target"),
    ("monthlyProgress", "monthly_progress"),
];

const SALES: &[FieldPair] = &[
    ("cashierId", "cashier_id"),
    ("totalAmount", "total_amount"),
    ("settlementCurrency", "settlement_currency"),
    ("exchangeSource", "exchange_source"),
    ("exchangeRate", "exchange_rate"),
    ("exchangeRateTimestamp", "exchange_rate_timestamp"),
    ("exchangeRates", "exchange_rates"),
    ("origin", "origin"),
    ("payment_method", "payment_method"),
    ("sequenceId", "sequence_id"),
    ("systemVerified", "system_verified"),
    ("systemReviewStatus", "system_review_status"),
    ("systemReviewReason", "system_review_reason"),
    ("isReturned", "is_returned"),
];

const CATEGORIES: &[FieldPair] = &[("name", "name"), ("description", "description")];

const STORAGES: &[FieldPair] = &[
    ("name", "name"),
    ("isSystem", "is_system"),
    ("isProtected", "is_protected"),
];

/// The field map of one entity kind.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    kind: EntityKind,
    domain: &'static [FieldPair],
}

impl FieldMap {
    /// Returns the field map of `kind`.
    pub fn for_kind(kind: EntityKind) -> Self {
        let domain = match kind {
            EntityKind::Products => PRODUCTS,
            EntityKind::Customers => CUSTOMERS,
            EntityKind::Suppliers => SUPPLIERS,
            EntityKind::PurchaseOrders => PURCHASE_ORDERS,
            EntityKind::SalesOrders => SALES_ORDERS,
            EntityKind::Invoices => INVOICES,
            EntityKind::Users => USERS,
            EntityKind::Sales => SALES,
            EntityKind::Categories => CATEGORIES,
            EntityKind::Storages => STORAGES,
        };
        Self { kind, domain }
    }

    /// Returns the kind this map belongs to.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Iterates every declared pair, metadata first.
    pub fn pairs(&self) -> impl Iterator<Item = FieldPair> + '_ {
        METADATA_FIELDS.iter().chain(self.domain).copied()
    }

    /// Returns the remote column for a local field.
    pub fn remote_name(&self, local: &str) -> Option<&'static str> {
        self.pairs().find(|(l, _)| *l == local).map(|(_, r)| r)
    }

    /// Returns the local field for a remote column.
    pub fn local_name(&self, remote: &str) -> Option<&'static str> {
        self.pairs().find(|(_, r)| *r == remote).map(|(l, _)| l)
    }

    /// Translates a local document into a remote row.
    ///
    /// Local-only sync metadata is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnmappedField`] for any other undeclared key.
    pub fn to_remote(&self, doc: &Document) -> ProtocolResult<Document> {
        let mut row = Document::new();
        for (key, value) in doc {
            if LOCAL_ONLY_FIELDS.contains(&key.as_str()) {
                continue;
            }
            let name = self
                .remote_name(key)
                .ok_or_else(|| self.unmapped(key, Direction::ToRemote))?;
            row.insert(name.to_string(), value.clone());
        }
        Ok(row)
    }

    /// Translates a remote row into a local document.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnmappedField`] for any undeclared column.
    pub fn to_local(&self, row: &Document) -> ProtocolResult<Document> {
        let mut doc = Document::new();
        for (key, value) in row {
            let name = self
                .local_name(key)
                .ok_or_else(|| self.unmapped(key, Direction::ToLocal))?;
            doc.insert(name.to_string(), value.clone());
        }
        Ok(doc)
    }

    fn unmapped(&self, field: &str, direction: Direction) -> ProtocolError {
        ProtocolError::UnmappedField {
            kind: self.kind,
            field: field.to_string(),
            direction,
        }
    }
}

impl EntityKind {
    /// Returns this kind's field map.
    pub fn field_map(&self) -> FieldMap {
        FieldMap::for_kind(*self)
    }
}
