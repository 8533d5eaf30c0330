//! Cross-module scenario tests: full offline-to-online lifecycles

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use crate::db::Database;
use crate::models::{Category, ExpenseFields, ExpenseKind, PaymentMethod, SyncStatus};
use crate::store::ExpenseStore;
use crate::sync::clock::ManualClock;
use crate::sync::engine::{SyncConfig, SyncEngine};
use crate::sync::transport::MockRemoteService;

fn fields(description: &str, amount: f64) -> ExpenseFields {
    ExpenseFields {
        user_id: "user-1".to_string(),
        date: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        category: Category::Grocery,
        kind: ExpenseKind::Personal,
        payment_method: PaymentMethod::Upi,
        description: description.to_string(),
        amount,
    }
}

fn store_on(db: Arc<Database>) -> Arc<ExpenseStore<MockRemoteService>> {
    let clock = Arc::new(ManualClock::new(1_000));
    let remote = Arc::new(MockRemoteService::new());
    remote.set_now_ms(1_000);
    let engine = Arc::new(SyncEngine::new(db, remote, clock, SyncConfig::new("user-1")));
    Arc::new(ExpenseStore::new(engine))
}

#[tokio::test]
async fn offline_mutations_drain_in_order_after_reconnect() {
    let store = store_on(Arc::new(Database::open_in_memory().unwrap()));
    store.engine().set_online(false);

    // A full lifecycle recorded while offline: create, edit, delete.
    let kept = store.add_expense(fields("Veggies", 500.0)).unwrap();
    let doomed = store.add_expense(fields("Impulse buy", 900.0)).unwrap();
    store
        .update_expense(&kept.id, fields("Veggies and fruit", 650.0))
        .unwrap();
    store.delete_expense(&doomed.id).unwrap();
    assert_eq!(store.snapshot().pending_count, 4);

    store.engine().set_online(true);
    let stats = store.sync_now().await.unwrap();
    assert_eq!(stats.remaining, 0);

    // Mutation order reached the server intact.
    let ops: Vec<String> = store
        .engine()
        .remote()
        .applied_log()
        .into_iter()
        .map(|(op, _)| op)
        .collect();
    assert_eq!(ops, vec!["create", "create", "update", "delete"]);

    // One expense survives, with the edited value.
    assert_eq!(store.engine().remote().expense_count(), 1);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.expenses.len(), 1);
    assert_eq!(snapshot.expenses[0].description, "Veggies and fruit");
    assert_eq!(snapshot.expenses[0].sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn queue_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pocketbook.db");

    let kept_id;
    {
        let store = store_on(Arc::new(Database::open(&path).unwrap()));
        store.engine().set_online(false);
        kept_id = store.add_expense(fields("Veggies", 500.0)).unwrap().id;
        assert_eq!(store.snapshot().pending_count, 1);
    }

    // "Restart": fresh connection, fresh engine, same file.
    let store = store_on(Arc::new(Database::open(&path).unwrap()));
    store.publish().unwrap();
    assert_eq!(store.snapshot().pending_count, 1);

    let stats = store.sync_now().await.unwrap();
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.remaining, 0);
    let row = store.get_expense(&kept_id).unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert!(row.remote_id.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_drains_apply_each_mutation_once() {
    let store = store_on(Arc::new(Database::open_in_memory().unwrap()));
    store.engine().set_online(false);
    for n in 0..10 {
        store
            .add_expense(fields(&format!("Expense {n}"), f64::from(n)))
            .unwrap();
    }
    store.engine().set_online(true);

    let engine = store.engine();
    let (a, b) = tokio::join!(engine.sync_now(), engine.sync_now());
    a.unwrap();
    b.unwrap();

    // However the two drains interleave, every mutation lands exactly once.
    assert_eq!(store.engine().remote().expense_count(), 10);
    assert_eq!(store.engine().remote().applied_log().len(), 10);
    assert_eq!(store.engine().pending_count().unwrap(), 0);
}
