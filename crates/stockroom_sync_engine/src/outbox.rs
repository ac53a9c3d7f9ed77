//! Durable outbox of pending local mutations.

use crate::error::SyncResult;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use stockroom_storage::LocalStore;
use stockroom_sync_protocol::{
    coalesce, Coalesced, Document, EntityKind, Mutation, OutboxItem, ProtocolError,
};
use tokio::sync::watch;

/// Local table holding outbox items.
pub const OUTBOX_TABLE: &str = "outbox";

/// The outbox queue.
///
/// Items live in the [`OUTBOX_TABLE`] of the local store and every call
/// reads or writes the store directly, so concurrent writers are always
/// observed and a restart never loses queued work. Every change to the
/// number of queued items is published on a watch channel.
pub struct Outbox {
    store: Arc<dyn LocalStore>,
    /// Serializes read-modify-write sequences and holds the last issued
    /// timestamp, keeping FIFO order strict within this process.
    last_stamp: Mutex<DateTime<Utc>>,
    pending_tx: watch::Sender<usize>,
}

impl Outbox {
    /// Opens the outbox over `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbox table cannot be read.
    pub fn new(store: Arc<dyn LocalStore>) -> SyncResult<Self> {
        let count = store.count(OUTBOX_TABLE)?;
        let (pending_tx, _) = watch::channel(count);
        Ok(Self {
            store,
            last_stamp: Mutex::new(DateTime::<Utc>::from(std::time::UNIX_EPOCH)),
            pending_tx,
        })
    }

    /// Records a local mutation, coalescing it with any item already
    /// queued for the same entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn enqueue(&self, mutation: Mutation) -> SyncResult<()> {
        let mut last = self.last_stamp.lock();
        let now = Utc::now().max(*last + Duration::microseconds(1));

        let existing = self.find(mutation.kind, &mutation.entity_id)?;
        let kind = mutation.kind;
        let entity_id = mutation.entity_id.clone();

        match coalesce(existing.as_ref(), mutation, now) {
            Coalesced::Insert(item) => {
                tracing::debug!(entity_type = %kind, entity_id = %entity_id, operation = %item.operation, "queued mutation");
                self.write(&item)?;
            }
            Coalesced::Replace(item) => {
                tracing::debug!(entity_type = %kind, entity_id = %entity_id, operation = %item.operation, "coalesced mutation");
                self.write(&item)?;
            }
            Coalesced::Remove(id) => {
                tracing::debug!(entity_type = %kind, entity_id = %entity_id, "create and delete cancelled out");
                self.store.delete(OUTBOX_TABLE, &id)?;
            }
        }

        *last = now;
        drop(last);
        self.publish_count()
    }

    /// Returns every queued item, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds a malformed item.
    pub fn pending(&self) -> SyncResult<Vec<OutboxItem>> {
        let mut items = self
            .store
            .scan(OUTBOX_TABLE)?
            .into_iter()
            .map(decode)
            .collect::<SyncResult<Vec<_>>>()?;
        items.sort_by_key(|item| item.timestamp);
        Ok(items)
    }

    /// Returns the number of queued items.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.store.count(OUTBOX_TABLE)?)
    }

    /// Returns the queued items of one entity kind, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn by_kind(&self, kind: EntityKind) -> SyncResult<Vec<OutboxItem>> {
        Ok(self
            .pending()?
            .into_iter()
            .filter(|item| item.entity_type == kind)
            .collect())
    }

    /// Returns the item with `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get(&self, id: &str) -> SyncResult<Option<OutboxItem>> {
        self.store.get(OUTBOX_TABLE, id)?.map(decode).transpose()
    }

    /// Removes the item with `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn remove(&self, id: &str) -> SyncResult<()> {
        let guard = self.last_stamp.lock();
        self.store.delete(OUTBOX_TABLE, id)?;
        drop(guard);
        self.publish_count()
    }

    /// Removes a pushed item unless a newer mutation was coalesced into
    /// it while the push was in flight.
    ///
    /// Returns `false` if the stored item changed or is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn acknowledge(&self, pushed: &OutboxItem) -> SyncResult<bool> {
        let guard = self.last_stamp.lock();
        match self.get(&pushed.id)? {
            Some(current) if current.timestamp == pushed.timestamp => {
                self.store.delete(OUTBOX_TABLE, &pushed.id)?;
            }
            _ => return Ok(false),
        }
        drop(guard);
        self.publish_count()?;
        Ok(true)
    }

    /// Records one more failed push attempt for the item with `id`.
    ///
    /// Returns the new retry count, or `None` if the item is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn increment_retry(&self, id: &str) -> SyncResult<Option<u32>> {
        let _guard = self.last_stamp.lock();
        let Some(item) = self.get(id)? else {
            return Ok(None);
        };
        let retry_count = item.retry_count + 1;
        self.set_retry_count(id, retry_count)?;
        Ok(Some(retry_count))
    }

    /// Removes every queued item.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear(&self) -> SyncResult<()> {
        let guard = self.last_stamp.lock();
        self.store.clear(OUTBOX_TABLE)?;
        drop(guard);
        self.publish_count()
    }

    /// Returns the items that have used up `max_attempts`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn stranded(&self, max_attempts: u32) -> SyncResult<Vec<OutboxItem>> {
        Ok(self
            .pending()?
            .into_iter()
            .filter(|item| item.is_stranded(max_attempts))
            .collect())
    }

    /// Gives a stranded item a fresh retry budget.
    ///
    /// Returns `false` if no item has `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn reset_retries(&self, id: &str) -> SyncResult<bool> {
        let _guard = self.last_stamp.lock();
        let reset = self.set_retry_count(id, 0)?;
        if reset {
            tracing::info!(item_id = id, "reset outbox retries");
        }
        Ok(reset)
    }

    /// Subscribes to changes of the queued item count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.pending_tx.subscribe()
    }

    fn find(&self, kind: EntityKind, entity_id: &str) -> SyncResult<Option<OutboxItem>> {
        let entity_id = Value::String(entity_id.to_string());
        for doc in self.store.find_eq(OUTBOX_TABLE, "entityId", &entity_id)? {
            let item = decode(doc)?;
            if item.entity_type == kind {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn write(&self, item: &OutboxItem) -> SyncResult<()> {
        let Value::Object(doc) = serde_json::to_value(item).map_err(ProtocolError::from)? else {
            return Err(ProtocolError::MalformedRecord("outbox item is not an object".into()).into());
        };
        self.store.put(OUTBOX_TABLE, &item.id, doc)?;
        Ok(())
    }

    fn set_retry_count(&self, id: &str, retry_count: u32) -> SyncResult<bool> {
        let mut fields = Document::new();
        fields.insert("retryCount".into(), Value::from(retry_count));
        Ok(self.store.update(OUTBOX_TABLE, id, fields)?)
    }

    fn publish_count(&self) -> SyncResult<()> {
        let count = self.pending_count()?;
        self.pending_tx.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
        Ok(())
    }
}

fn decode(doc: Document) -> SyncResult<OutboxItem> {
    Ok(serde_json::from_value(Value::Object(doc)).map_err(ProtocolError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stockroom_storage::MemoryStore;
    use stockroom_sync_protocol::Operation;

    fn outbox() -> Outbox {
        Outbox::new(Arc::new(MemoryStore::in_memory())).unwrap()
    }

    fn mutation(kind: EntityKind, id: &str, operation: Operation, name: &str) -> Mutation {
        Mutation {
            kind,
            entity_id: id.into(),
            operation,
            data: json!({ "id": id, "name": name }).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn create_then_update_keeps_one_create() {
        let outbox = outbox();
        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Create, "a"))
            .unwrap();
        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Update, "b"))
            .unwrap();

        let items = outbox.pending().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation, Operation::Create);
        assert_eq!(items[0].data["name"], "b");
    }

    #[test]
    fn create_then_delete_empties_queue() {
        let outbox = outbox();
        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Create, "a"))
            .unwrap();
        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Delete, "a"))
            .unwrap();
        assert!(outbox.pending().unwrap().is_empty());
    }

    #[test]
    fn same_id_in_different_kinds_is_not_coalesced() {
        let outbox = outbox();
        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Create, "a"))
            .unwrap();
        outbox
            .enqueue(mutation(EntityKind::Customers, "x", Operation::Delete, "a"))
            .unwrap();
        assert_eq!(outbox.pending_count().unwrap(), 2);
        assert_eq!(outbox.by_kind(EntityKind::Customers).unwrap().len(), 1);
    }

    #[test]
    fn pending_is_fifo() {
        let outbox = outbox();
        for id in ["c", "a", "b"] {
            outbox
                .enqueue(mutation(EntityKind::Products, id, Operation::Create, id))
                .unwrap();
        }
        let ids: Vec<_> = outbox
            .pending()
            .unwrap()
            .into_iter()
            .map(|item| item.entity_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn acknowledge_skips_items_changed_mid_push() {
        let outbox = outbox();
        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Update, "a"))
            .unwrap();
        let pushed = outbox.pending().unwrap().remove(0);

        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Update, "b"))
            .unwrap();
        assert!(!outbox.acknowledge(&pushed).unwrap());
        assert_eq!(outbox.pending().unwrap()[0].data["name"], "b");

        let pushed = outbox.pending().unwrap().remove(0);
        assert!(outbox.acknowledge(&pushed).unwrap());
        assert_eq!(outbox.pending_count().unwrap(), 0);
    }

    #[test]
    fn retries_strand_and_reset() {
        let outbox = outbox();
        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Update, "a"))
            .unwrap();
        let id = outbox.pending().unwrap()[0].id.clone();

        for expected in 1..=3 {
            assert_eq!(outbox.increment_retry(&id).unwrap(), Some(expected));
        }
        assert_eq!(outbox.stranded(3).unwrap().len(), 1);

        assert!(outbox.reset_retries(&id).unwrap());
        assert!(outbox.stranded(3).unwrap().is_empty());
        assert_eq!(outbox.get(&id).unwrap().unwrap().retry_count, 0);

        assert_eq!(outbox.increment_retry("missing").unwrap(), None);
        assert!(!outbox.reset_retries("missing").unwrap());
    }

    #[test]
    fn pending_count_is_published() {
        let outbox = outbox();
        let rx = outbox.subscribe();
        assert_eq!(*rx.borrow(), 0);

        outbox
            .enqueue(mutation(EntityKind::Products, "x", Operation::Create, "a"))
            .unwrap();
        assert_eq!(*rx.borrow(), 1);

        let id = outbox.pending().unwrap()[0].id.clone();
        outbox.remove(&id).unwrap();
        assert_eq!(*rx.borrow(), 0);

        outbox
            .enqueue(mutation(EntityKind::Products, "y", Operation::Create, "a"))
            .unwrap();
        outbox.clear().unwrap();
        assert_eq!(*rx.borrow(), 0);
    }

    #[test]
    fn queue_survives_reopen() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::in_memory());
        Outbox::new(store.clone())
            .unwrap()
            .enqueue(mutation(EntityKind::Invoices, "i1", Operation::Create, "a"))
            .unwrap();

        let reopened = Outbox::new(store).unwrap();
        assert_eq!(*reopened.subscribe().borrow(), 1);
        assert_eq!(reopened.pending().unwrap()[0].entity_id, "i1");
    }
}
