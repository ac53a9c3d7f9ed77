//! Retry command implementation.

use super::open_store;
use std::path::Path;
use std::sync::Arc;
use stockroom_storage::LocalStore;
use stockroom_sync_engine::Outbox;
use stockroom_sync_protocol::MAX_PUSH_ATTEMPTS;

/// Which items to reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A single outbox item.
    Item(String),
    /// Every item that used up its attempts.
    AllStranded,
}

/// Runs the retry command.
pub fn run(path: &Path, target: Target) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn LocalStore> = open_store(path)?;
    let reset = reset(store, &target)?;
    println!("Reset {} outbox items", reset);
    Ok(())
}

/// Resets the retry counter of `target`, returning how many items changed.
pub fn reset(store: Arc<dyn LocalStore>, target: &Target) -> Result<usize, Box<dyn std::error::Error>> {
    let outbox = Outbox::new(store)?;
    match target {
        Target::Item(id) => {
            if !outbox.reset_retries(id)? {
                return Err(format!("No outbox item {}", id).into());
            }
            Ok(1)
        }
        Target::AllStranded => {
            let mut count = 0;
            for item in outbox.stranded(MAX_PUSH_ATTEMPTS)? {
                if outbox.reset_retries(&item.id)? {
                    count += 1;
                }
            }
            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stockroom_storage::MemoryStore;
    use stockroom_sync_protocol::{EntityKind, Mutation, Operation};

    fn stranded_store(ids: &[&str]) -> (Arc<dyn LocalStore>, Outbox) {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::in_memory());
        let outbox = Outbox::new(store.clone()).unwrap();
        for id in ids {
            outbox
                .enqueue(Mutation {
                    kind: EntityKind::Invoices,
                    entity_id: (*id).into(),
                    operation: Operation::Update,
                    data: json!({ "id": id }).as_object().cloned().unwrap(),
                })
                .unwrap();
        }
        for item in outbox.pending().unwrap() {
            for _ in 0..MAX_PUSH_ATTEMPTS {
                outbox.increment_retry(&item.id).unwrap();
            }
        }
        (store, outbox)
    }

    #[test]
    fn resets_single_item() {
        let (store, outbox) = stranded_store(&["a", "b"]);
        let first = outbox.pending().unwrap().remove(0);

        assert_eq!(reset(store, &Target::Item(first.id.clone())).unwrap(), 1);
        assert_eq!(outbox.get(&first.id).unwrap().unwrap().retry_count, 0);
        assert_eq!(outbox.stranded(MAX_PUSH_ATTEMPTS).unwrap().len(), 1);
    }

    #[test]
    fn resets_all_stranded() {
        let (store, outbox) = stranded_store(&["a", "b", "c"]);
        assert_eq!(reset(store, &Target::AllStranded).unwrap(), 3);
        assert!(outbox.stranded(MAX_PUSH_ATTEMPTS).unwrap().is_empty());
    }

    #[test]
    fn unknown_item_is_an_error() {
        let (store, _outbox) = stranded_store(&[]);
        assert!(reset(store, &Target::Item("nope".into())).is_err());
    }
}
