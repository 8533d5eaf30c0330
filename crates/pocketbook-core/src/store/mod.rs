//! Expense store: the application-facing facade
//!
//! Every mutation lands in `SQLite` first, together with its outbox entry,
//! in one transaction. The UI reads from the local store only; the network
//! is an afterthought handled by the engine. Observers get a fresh
//! [`StoreSnapshot`] over a watch channel after every local change.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::db::{
    CacheRepository, ExpenseRepository, MetadataRepository, NewOutboxEntry, OutboxRepository,
    SqliteExpenseRepository, SqliteMetaRepository, SqliteOutboxRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    new_idempotency_key, CacheEntry, Expense, ExpenseFields, ExpenseId, Operation, SyncStatus,
};
use crate::sync::engine::{SyncEngine, SyncStats};
use crate::sync::transport::{RemoteExpense, RemoteService};

/// How long a cold-start seed result is trusted before the server is asked
/// again for a user with no local rows
const SEED_CACHE_TTL_MS: i64 = 5 * 60 * 1_000;

/// What observers see: the user's visible expenses plus queue health
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Visible (not soft-deleted) expenses, newest first
    pub expenses: Vec<Expense>,
    /// Outbox size
    pub pending_count: u64,
    /// Whether any row is in the error state
    pub has_errors: bool,
}

/// Point-in-time sync health, for status surfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatusReport {
    pub online: bool,
    pub syncing: bool,
    pub pending_count: u64,
    pub error_count: u64,
    /// Unix ms of the last drain attempt, if any
    pub last_sync_at: Option<i64>,
    /// Unix ms of the last drain that left the outbox empty, if any
    pub last_successful_sync: Option<i64>,
}

/// Local-first expense store backed by a [`SyncEngine`]
pub struct ExpenseStore<R: RemoteService> {
    engine: Arc<SyncEngine<R>>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
}

impl<R: RemoteService> ExpenseStore<R> {
    pub fn new(engine: Arc<SyncEngine<R>>) -> Self {
        let (snapshot_tx, _) = watch::channel(StoreSnapshot::default());
        Self {
            engine,
            snapshot_tx,
        }
    }

    /// Observe snapshot changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    /// Record a new expense and queue its push
    ///
    /// Returns immediately with the pending row; the network happens in the
    /// background.
    pub fn add_expense(self: &Arc<Self>, fields: ExpenseFields) -> Result<Expense> {
        validate_fields(&fields)?;
        let now = self.engine.clock().now_ms();
        let key = new_idempotency_key(now);
        let expense = Expense::new(fields, now, key.clone());

        self.engine.db().with_tx(|tx| {
            SqliteExpenseRepository::new(tx).put(&expense)?;
            SqliteOutboxRepository::new(tx).enqueue(
                NewOutboxEntry {
                    operation: Operation::Create,
                    expense_id: expense.id,
                    payload: Some(serde_json::to_value(expense.fields())?),
                    expected_version: None,
                    idempotency_key: key,
                },
                now,
            )?;
            Ok(())
        })?;

        debug!(expense = %expense.id, "Expense recorded, push queued");
        self.publish()?;
        self.trigger_sync();
        Ok(expense)
    }

    /// Replace an expense's fields and queue the push
    pub fn update_expense(self: &Arc<Self>, id: &ExpenseId, fields: ExpenseFields) -> Result<Expense> {
        validate_fields(&fields)?;
        let now = self.engine.clock().now_ms();
        let key = new_idempotency_key(now);

        let updated = self.engine.db().with_tx(|tx| {
            let expenses = SqliteExpenseRepository::new(tx);
            let Some(current) = expenses.get(id)? else {
                return Err(Error::NotFound(id.to_string()));
            };
            if current.is_deleted {
                return Err(Error::NotFound(id.to_string()));
            }

            let updated = Expense {
                user_id: fields.user_id.clone(),
                date: fields.date,
                category: fields.category,
                kind: fields.kind,
                payment_method: fields.payment_method,
                description: fields.description.clone(),
                amount: fields.amount,
                sync_status: SyncStatus::Pending,
                local_updated_at: now,
                sync_attempts: 0,
                last_sync_error: None,
                // Each local edit extends the version chain so the queued
                // push carries a CAS token its predecessor will satisfy.
                version: current.version + 1,
                idempotency_key: key.clone(),
                ..current.clone()
            };
            expenses.put(&updated)?;
            SqliteOutboxRepository::new(tx).enqueue(
                NewOutboxEntry {
                    operation: Operation::Update,
                    expense_id: *id,
                    payload: Some(serde_json::to_value(updated.fields())?),
                    expected_version: Some(current.version),
                    idempotency_key: key,
                },
                now,
            )?;
            Ok(updated)
        })?;

        debug!(expense = %id, "Expense updated, push queued");
        self.publish()?;
        self.trigger_sync();
        Ok(updated)
    }

    /// Soft-delete an expense and queue the push
    ///
    /// The row disappears from snapshots immediately; it is only hard-removed
    /// once the server acknowledges the delete.
    pub fn delete_expense(self: &Arc<Self>, id: &ExpenseId) -> Result<()> {
        let now = self.engine.clock().now_ms();
        let key = new_idempotency_key(now);

        self.engine.db().with_tx(|tx| {
            let expenses = SqliteExpenseRepository::new(tx);
            let Some(current) = expenses.get(id)? else {
                return Err(Error::NotFound(id.to_string()));
            };
            if current.is_deleted {
                return Err(Error::NotFound(id.to_string()));
            }
            expenses.mark_deleted(id, now, &key)?;
            SqliteOutboxRepository::new(tx).enqueue(
                NewOutboxEntry {
                    operation: Operation::Delete,
                    expense_id: *id,
                    payload: None,
                    expected_version: Some(current.version),
                    idempotency_key: key,
                },
                now,
            )?;
            Ok(())
        })?;

        debug!(expense = %id, "Expense deleted locally, push queued");
        self.publish()?;
        self.trigger_sync();
        Ok(())
    }

    /// Get one expense; soft-deleted rows read as absent
    pub fn get_expense(&self, id: &ExpenseId) -> Result<Option<Expense>> {
        let expense = self
            .engine
            .db()
            .with_conn(|conn| SqliteExpenseRepository::new(conn).get(id))?;
        Ok(expense.filter(|e| !e.is_deleted))
    }

    /// List the user's expenses, optionally date-bounded, seeding from the
    /// server first if this device has never held any rows
    pub async fn load_expenses(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<Expense>> {
        self.seed_if_empty().await?;
        let expenses = self.engine.db().with_conn(|conn| {
            SqliteExpenseRepository::new(conn).query_by_user_and_range(
                self.engine.user_id(),
                start,
                end,
            )
        })?;
        self.publish()?;
        Ok(expenses)
    }

    /// Run a drain right now and refresh the snapshot afterwards
    pub async fn sync_now(&self) -> Result<SyncStats> {
        let stats = self.engine.sync_now().await?;
        self.publish()?;
        Ok(stats)
    }

    /// Re-arm errored and parked work, drain, refresh the snapshot
    pub async fn retry_failed_syncs(&self) -> Result<SyncStats> {
        let stats = self.engine.retry_failed().await?;
        self.publish()?;
        Ok(stats)
    }

    /// Re-read the authoritative outbox count into the snapshot
    pub fn refresh_pending_count(&self) -> Result<u64> {
        self.publish()?;
        Ok(self.snapshot_tx.borrow().pending_count)
    }

    /// Sync health for status surfaces
    pub fn sync_status(&self) -> Result<SyncStatusReport> {
        let user_id = self.engine.user_id().to_string();
        let (pending_count, error_count, meta) = self.engine.db().with_conn(|conn| {
            let pending = SqliteOutboxRepository::new(conn).count()?;
            let errors = SqliteExpenseRepository::new(conn).count_errors()?;
            let meta = MetadataRepository::get(&SqliteMetaRepository::new(conn), &user_id)?;
            Ok((pending, errors, meta))
        })?;

        Ok(SyncStatusReport {
            online: self.engine.is_online(),
            syncing: self.engine.is_syncing(),
            pending_count,
            error_count,
            last_sync_at: meta.as_ref().map(|m| m.last_sync_at),
            last_successful_sync: meta
                .as_ref()
                .map(|m| m.last_successful_sync)
                .filter(|ms| *ms > 0),
        })
    }

    /// Wipe all local state (logout). Unsynced mutations are lost; callers
    /// should drain first.
    pub fn clear_all(&self) -> Result<()> {
        let pending = self.engine.pending_count()?;
        if pending > 0 {
            warn!(pending, "Clearing local data with unsynced mutations");
        }
        self.engine.db().clear_all()?;
        self.publish()?;
        Ok(())
    }

    /// Recompute and broadcast the snapshot from the database
    pub fn publish(&self) -> Result<()> {
        let user_id = self.engine.user_id().to_string();
        let snapshot = self.engine.db().with_conn(|conn| {
            let expenses = SqliteExpenseRepository::new(conn)
                .query_by_user_and_range(&user_id, None, None)?;
            let pending_count = SqliteOutboxRepository::new(conn).count()?;
            let has_errors = SqliteExpenseRepository::new(conn).count_errors()? > 0;
            Ok(StoreSnapshot {
                expenses,
                pending_count,
                has_errors,
            })
        })?;
        self.snapshot_tx.send_replace(snapshot);
        Ok(())
    }

    /// Drain in the background, then refresh the snapshot
    fn trigger_sync(self: &Arc<Self>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = store.sync_now().await {
                warn!("Background sync failed: {e}");
            }
        });
    }

    /// One-time pull when the local store is empty for this user
    ///
    /// The result is memoized for a few minutes so an account that really
    /// has no expenses does not hit the server on every list call.
    async fn seed_if_empty(&self) -> Result<()> {
        let user_id = self.engine.user_id().to_string();
        let now = self.engine.clock().now_ms();
        let cache_key = format!("expenses-seed:{user_id}");

        let needs_seed = self.engine.db().with_conn(|conn| {
            let count = SqliteExpenseRepository::new(conn).count_for_user(&user_id)?;
            if count > 0 {
                return Ok(false);
            }
            let cached = CacheRepository::get(&SqliteMetaRepository::new(conn), &cache_key, now)?;
            Ok(cached.is_none())
        })?;
        if !needs_seed {
            return Ok(());
        }
        if !self.engine.is_online() {
            debug!("Skipping cold-start seed: offline");
            return Ok(());
        }

        let remote = match self.engine.remote().fetch_all(&user_id).await {
            Ok(remote) => remote,
            Err(e) => {
                // Seeding is best-effort; an empty local list is still valid.
                warn!("Cold-start seed failed: {e}");
                return Ok(());
            }
        };

        let seeded = remote.len();
        self.engine.db().with_tx(|tx| {
            let expenses = SqliteExpenseRepository::new(tx);
            for record in &remote {
                expenses.put(&seeded_expense(record, now))?;
            }
            CacheRepository::put(
                &SqliteMetaRepository::new(tx),
                &CacheEntry {
                    key: cache_key.clone(),
                    data: serde_json::json!({ "seeded": seeded }),
                    expires: now + SEED_CACHE_TTL_MS,
                },
            )?;
            Ok(())
        })?;
        info!(expenses = seeded, "Seeded local store from server");
        Ok(())
    }
}

/// A server record landing on a fresh device
fn seeded_expense(record: &RemoteExpense, now_ms: i64) -> Expense {
    Expense {
        id: ExpenseId::new(),
        remote_id: Some(record.id.clone()),
        user_id: record.user_id.clone(),
        date: record.date,
        category: record.category,
        kind: record.kind,
        payment_method: record.payment_method,
        description: record.description.clone(),
        amount: record.amount,
        is_deleted: false,
        sync_status: SyncStatus::Synced,
        local_created_at: now_ms,
        local_updated_at: record.updated_at.timestamp_millis(),
        sync_attempts: 0,
        last_sync_error: None,
        version: record.version,
        idempotency_key: format!("server-{}", record.id),
    }
}

fn validate_fields(fields: &ExpenseFields) -> Result<()> {
    if fields.user_id.trim().is_empty() {
        return Err(Error::InvalidInput("user id must not be empty".to_string()));
    }
    if !fields.amount.is_finite() || fields.amount < 0.0 {
        return Err(Error::InvalidInput(format!(
            "amount must be a non-negative number, got {}",
            fields.amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Category, ExpenseKind, PaymentMethod};
    use crate::sync::clock::ManualClock;
    use crate::sync::engine::SyncConfig;
    use crate::sync::transport::{MockRemoteService, TransportError};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn store() -> (Arc<ExpenseStore<MockRemoteService>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let remote = Arc::new(MockRemoteService::new());
        remote.set_now_ms(1_000);
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = Arc::new(SyncEngine::new(
            db,
            remote,
            clock.clone(),
            SyncConfig::new("user-1"),
        ));
        (Arc::new(ExpenseStore::new(engine)), clock)
    }

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

    #[tokio::test]
    async fn add_publishes_a_pending_snapshot_then_syncs() {
        let (store, _) = store();
        let mut rx = store.subscribe();

        let expense = store.add_expense(fields("Veggies", 500.0)).unwrap();
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.expenses.len(), 1);
        assert_eq!(snapshot.pending_count, 1);
        assert_eq!(snapshot.expenses[0].sync_status, SyncStatus::Pending);

        let stats = store.sync_now().await.unwrap();
        assert_eq!(stats.remaining, 0);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.pending_count, 0);
        assert_eq!(snapshot.expenses[0].sync_status, SyncStatus::Synced);
        assert_eq!(
            store.get_expense(&expense.id).unwrap().unwrap().remote_id.as_deref(),
            Some("srv-1")
        );
    }

    #[tokio::test]
    async fn update_queues_behind_the_create() {
        let (store, _) = store();
        let expense = store.add_expense(fields("Veggies", 500.0)).unwrap();
        let updated = store
            .update_expense(&expense.id, fields("Veggies and fruit", 650.0))
            .unwrap();
        assert_eq!(updated.amount, 650.0);
        assert_eq!(store.snapshot().pending_count, 2);

        store.sync_now().await.unwrap();
        assert_eq!(store.snapshot().pending_count, 0);

        let server = store.engine().remote().expense("srv-1").unwrap();
        assert_eq!(server.description, "Veggies and fruit");
        assert_eq!(server.version, 2);
    }

    #[tokio::test]
    async fn sequential_offline_edits_both_reach_the_server() {
        let (store, _) = store();
        let expense = store.add_expense(fields("Veggies", 500.0)).unwrap();
        store.sync_now().await.unwrap();

        // Server clock far ahead: a stale CAS token on the second edit
        // would self-conflict against the first and lose to it under
        // last write wins.
        store.engine().remote().set_now_ms(500_000);
        store.engine().set_online(false);
        store
            .update_expense(&expense.id, fields("Edit one", 510.0))
            .unwrap();
        let second = store
            .update_expense(&expense.id, fields("Edit two", 520.0))
            .unwrap();
        assert_eq!(second.version, 3);

        store.engine().set_online(true);
        let stats = store.sync_now().await.unwrap();
        assert_eq!(stats.conflicts, 0);
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.remaining, 0);

        let server = store.engine().remote().expense("srv-1").unwrap();
        assert_eq!(server.description, "Edit two");
        assert_eq!(server.version, 3);
        let row = store.get_expense(&expense.id).unwrap().unwrap();
        assert_eq!(row.version, 3);
        assert_eq!(row.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn update_of_missing_or_deleted_row_is_not_found() {
        let (store, _) = store();
        let missing = ExpenseId::new();
        assert!(matches!(
            store.update_expense(&missing, fields("x", 1.0)),
            Err(Error::NotFound(_))
        ));

        let expense = store.add_expense(fields("Veggies", 500.0)).unwrap();
        store.delete_expense(&expense.id).unwrap();
        assert!(matches!(
            store.update_expense(&expense.id, fields("x", 1.0)),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_hides_the_row_immediately() {
        let (store, _) = store();
        let expense = store.add_expense(fields("Veggies", 500.0)).unwrap();
        store.sync_now().await.unwrap();

        store.delete_expense(&expense.id).unwrap();
        assert!(store.snapshot().expenses.is_empty());
        assert!(store.get_expense(&expense.id).unwrap().is_none());
        // Still queued for the server.
        assert_eq!(store.snapshot().pending_count, 1);

        store.sync_now().await.unwrap();
        assert_eq!(store.snapshot().pending_count, 0);
        assert_eq!(store.engine().remote().expense_count(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_amounts() {
        let (store, _) = store();
        assert!(store.add_expense(fields("bad", -1.0)).is_err());
        assert!(store.add_expense(fields("bad", f64::NAN)).is_err());
        assert_eq!(store.snapshot().pending_count, 0);
    }

    #[tokio::test]
    async fn cold_start_seeds_once_from_the_server() {
        let (store, _) = store();
        store.engine().remote().seed_expense(RemoteExpense {
            id: "srv-9".to_string(),
            user_id: "user-1".to_string(),
            date: Utc.with_ymd_and_hms(2025, 5, 20, 8, 0, 0).unwrap(),
            category: Category::Travel,
            kind: ExpenseKind::Personal,
            payment_method: PaymentMethod::Card,
            description: "Train ticket".to_string(),
            amount: 45.0,
            version: 3,
            updated_at: Utc.with_ymd_and_hms(2025, 5, 20, 8, 0, 0).unwrap(),
        });

        let expenses = store.load_expenses(None, None).await.unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].remote_id.as_deref(), Some("srv-9"));
        assert_eq!(expenses[0].sync_status, SyncStatus::Synced);
        assert_eq!(expenses[0].version, 3);
        // Seeded rows queue nothing.
        assert_eq!(store.snapshot().pending_count, 0);

        store.load_expenses(None, None).await.unwrap();
        assert_eq!(store.engine().remote().fetch_calls(), 1);
    }

    #[tokio::test]
    async fn empty_server_seed_is_memoized() {
        let (store, clock) = store();

        store.load_expenses(None, None).await.unwrap();
        store.load_expenses(None, None).await.unwrap();
        assert_eq!(store.engine().remote().fetch_calls(), 1);

        // After the memo expires the store asks again.
        clock.advance_ms(SEED_CACHE_TTL_MS + 1);
        store.load_expenses(None, None).await.unwrap();
        assert_eq!(store.engine().remote().fetch_calls(), 2);
    }

    #[tokio::test]
    async fn sync_status_reflects_queue_health() {
        let (store, _) = store();
        store.add_expense(fields("Veggies", 500.0)).unwrap();
        store.engine().remote().push_failure(TransportError::Retryable {
            status: Some(500),
            reason: "server error".to_string(),
        });

        store.sync_now().await.unwrap();
        let status = store.sync_status().unwrap();
        assert!(status.online);
        assert!(!status.syncing);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_sync_at, Some(1_000));
        assert_eq!(status.last_successful_sync, None);
        assert!(store.snapshot().has_errors);
    }

    #[tokio::test]
    async fn clear_all_empties_the_snapshot() {
        let (store, _) = store();
        store.add_expense(fields("Veggies", 500.0)).unwrap();
        store.sync_now().await.unwrap();

        store.clear_all().unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.expenses.is_empty());
        assert_eq!(snapshot.pending_count, 0);
        assert!(!snapshot.has_errors);
    }
}
