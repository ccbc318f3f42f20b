/// Persistence tests
///
/// The queue and resource snapshots are written through on every mutation,
/// so a restart picks up exactly where the previous session stopped.

use outbox_core::{FileStore, PersistentStore, SharedStore};
use outbox_sync::{kinds, Address, CartLine, PendingQueue};
use outbox_test_utils::{confirm, TestOutbox};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_queue_and_cart_restored_after_restart() {
    let test = TestOutbox::on_disk(false);
    test.cart()
        .add_item(CartLine::new("flat-white", 2, "S"), confirm)
        .await
        .unwrap();
    test.wishlist().add("grinder", confirm).await.unwrap();
    let office = Address::new("Office", "4 Strand Rd", "+95 9 456").with_coordinates(16.75, 96.25);
    test.addresses().add(office.clone(), confirm).await.unwrap();
    let before = test.queue().list();
    assert_eq!(before.len(), 3);

    let test = test.reopen(false);
    assert_eq!(test.queue().list(), before);
    assert_eq!(test.cart().item_count(), 2);
    assert!(test.wishlist().contains("grinder"));
    assert_eq!(test.addresses().get(&office.id), Some(office));

    test.set_online(true);
    test.sync_now().await;
    assert!(test.queue().is_empty());

    let test = test.reopen(true);
    assert!(test.queue().is_empty());
    assert_eq!(test.cart().lines()[0].product_id, "flat-white");
}

#[test]
fn test_unreadable_queue_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store
        .save_raw(&outbox_sync::queue::queue_key(), "not json")
        .unwrap();

    let queue = PendingQueue::open(Arc::new(store));
    assert!(queue.is_empty());
    queue.enqueue(kinds::ADD_TO_CART, json!({}));
    assert_eq!(queue.len(), 1);
}

fn arb_payload() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::from),
        proptest::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4)
            .prop_map(|m| json!(m)),
    ]
}

fn arb_kind() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(kinds::ADD_TO_CART),
        Just(kinds::UPDATE_CART),
        Just(kinds::ADD_ADDRESS),
        Just(kinds::CREATE_ORDER),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_queue_round_trips_through_file_store(
        entries in proptest::collection::vec((arb_kind(), arb_payload(), 0u8..3), 0..12),
    ) {
        let dir = TempDir::new().unwrap();
        let store: SharedStore = Arc::new(FileStore::open(dir.path()).unwrap());
        let queue = PendingQueue::open(store.clone());

        for (kind, payload, failures) in &entries {
            let id = queue.enqueue(*kind, payload.clone());
            for _ in 0..*failures {
                queue.increment_retry(&id, Some("503".to_string()));
            }
        }

        let reopened = PendingQueue::open(Arc::new(FileStore::open(dir.path()).unwrap()));
        prop_assert_eq!(reopened.list(), queue.list());
        prop_assert_eq!(queue.persist_failures(), 0);
    }
}
