//! The outbox drain engine
//!
//! `SyncEngine` pushes queued mutations to the remote service, one entry at
//! a time, oldest first per expense. Repeated retries go through the same
//! code path as first attempts; with the idempotency key replay on the
//! server side that makes the whole drain safe to re-run at any point,
//! including after a crash mid-drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::{
    Database, ExpenseRepository, MetadataRepository, NewOutboxEntry, OutboxRepository,
    SqliteExpenseRepository, SqliteMetaRepository, SqliteOutboxRepository,
};
use crate::error::Result;
use crate::models::{new_idempotency_key, Operation, OutboxEntry, SyncMetadata, SyncStatus};
use crate::sync::backoff::BackoffPolicy;
use crate::sync::clock::Clock;
use crate::sync::conflict::{self, Winner};
use crate::sync::transport::{MutationOutcome, RemoteExpense, RemoteService, TransportError};

/// Tunables for the drain loop
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub user_id: String,
    pub backoff: BackoffPolicy,
    /// Upper bound on drain passes per `sync_now` call. Conflict resolution
    /// can enqueue fresh entries, so the loop re-reads the due view until it
    /// is empty or this bound is hit.
    pub max_sweeps: u32,
}

impl SyncConfig {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            backoff: BackoffPolicy::default(),
            max_sweeps: 8,
        }
    }
}

/// What one `sync_now` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Mutations the server freshly applied
    pub acked: u32,
    /// Mutations the server had already applied; acknowledged via replay
    pub replayed: u32,
    /// Version conflicts resolved (either direction)
    pub conflicts: u32,
    /// Entries pushed into the future after a retryable failure
    pub rescheduled: u32,
    /// Entries parked after a non-retryable rejection
    pub rejected: u32,
    /// Outbox size after the drain
    pub remaining: u64,
    /// Set when the call returned without draining (offline, or another
    /// drain was already running)
    pub skipped: bool,
}

enum EntryOutcome {
    Acked { replayed: bool },
    ConflictResolved,
    Rescheduled,
    Rejected,
    /// Entry referenced a row that no longer exists, or a delete that never
    /// reached the server; settled locally
    Settled,
}

/// Drives the outbox against a [`RemoteService`]
pub struct SyncEngine<R: RemoteService> {
    db: Arc<Database>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    online: AtomicBool,
    syncing: AtomicBool,
}

/// Clears the in-flight flag even when a drain errors out
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<R: RemoteService> SyncEngine<R> {
    pub fn new(
        db: Arc<Database>,
        remote: Arc<R>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            remote,
            clock,
            config,
            online: AtomicBool::new(true),
            syncing: AtomicBool::new(false),
        }
    }

    /// Connectivity as last reported by the monitor
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Whether a drain is currently running
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Record a connectivity change; does not trigger a drain by itself
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// The remote service this engine pushes to
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    /// Fire a drain on a background task; overlapping triggers collapse
    /// into the drain already running
    pub fn trigger(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.sync_now().await {
                warn!("Background sync failed: {e}");
            }
        });
    }

    /// Drain the outbox until it is empty, every due entry has been pushed
    /// into the future, or the sweep bound is hit
    ///
    /// Re-entrant calls and offline calls return immediately with
    /// `skipped` set; queued work stays durable either way.
    pub async fn sync_now(&self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        if !self.is_online() {
            debug!("Sync skipped: offline");
            stats.skipped = true;
            stats.remaining = self.pending_count()?;
            return Ok(stats);
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync skipped: drain already in progress");
            stats.skipped = true;
            stats.remaining = self.pending_count()?;
            return Ok(stats);
        }
        let _guard = DrainGuard(&self.syncing);

        for _ in 0..self.config.max_sweeps {
            let now = self.clock.now_ms();
            let due = self
                .db
                .with_conn(|conn| SqliteOutboxRepository::new(conn).due_entries(now))?;
            if due.is_empty() {
                break;
            }

            debug!(entries = due.len(), "Draining outbox");
            let mut progressed = false;
            for entry in due {
                match self.process_entry(&entry).await? {
                    EntryOutcome::Acked { replayed } => {
                        progressed = true;
                        if replayed {
                            stats.replayed += 1;
                        } else {
                            stats.acked += 1;
                        }
                    }
                    EntryOutcome::ConflictResolved => {
                        progressed = true;
                        stats.conflicts += 1;
                    }
                    EntryOutcome::Settled => progressed = true,
                    EntryOutcome::Rescheduled => stats.rescheduled += 1,
                    EntryOutcome::Rejected => stats.rejected += 1,
                }
            }
            if !progressed {
                break;
            }
        }

        stats.remaining = self.pending_count()?;
        self.record_sweep(&stats)?;
        info!(
            acked = stats.acked,
            replayed = stats.replayed,
            conflicts = stats.conflicts,
            rescheduled = stats.rescheduled,
            rejected = stats.rejected,
            remaining = stats.remaining,
            "Sync pass complete"
        );
        Ok(stats)
    }

    /// Authoritative count of queued mutations
    pub fn pending_count(&self) -> Result<u64> {
        self.db
            .with_conn(|conn| SqliteOutboxRepository::new(conn).count())
    }

    /// Re-arm terminal and errored work for an immediate drain, then run one
    pub async fn retry_failed(&self) -> Result<SyncStats> {
        let now = self.clock.now_ms();
        let reset = self.db.with_tx(|tx| {
            let entries = SqliteOutboxRepository::new(tx).reset_for_retry(now)?;
            SqliteExpenseRepository::new(tx).reset_errors_to_pending()?;
            Ok(entries)
        })?;
        info!(entries = reset, "Re-armed failed mutations for retry");
        self.sync_now().await
    }

    async fn process_entry(&self, entry: &OutboxEntry) -> Result<EntryOutcome> {
        let expense = self
            .db
            .with_conn(|conn| SqliteExpenseRepository::new(conn).get(&entry.expense_id))?;

        let Some(expense) = expense else {
            // Row vanished from under the queue; nothing left to push.
            warn!(entry = entry.id, expense = %entry.expense_id, "Dropping orphaned outbox entry");
            self.db
                .with_conn(|conn| SqliteOutboxRepository::new(conn).remove(entry.id))?;
            return Ok(EntryOutcome::Settled);
        };

        // A delete for a row the server never saw settles locally.
        if entry.operation == Operation::Delete && expense.remote_id.is_none() {
            self.db.with_tx(|tx| {
                SqliteOutboxRepository::new(tx).remove(entry.id)?;
                SqliteExpenseRepository::new(tx).remove(&entry.expense_id)
            })?;
            return Ok(EntryOutcome::Settled);
        }

        self.db
            .with_conn(|conn| SqliteExpenseRepository::new(conn).mark_syncing(&entry.expense_id))?;

        let result = match entry.operation {
            Operation::Create => {
                let Some(payload) = &entry.payload else {
                    return self.park_malformed(entry, "create entry without payload");
                };
                self.remote.create(payload, &entry.idempotency_key).await
            }
            Operation::Update => {
                let Some(payload) = &entry.payload else {
                    return self.park_malformed(entry, "update entry without payload");
                };
                let Some(remote_id) = &expense.remote_id else {
                    // FIFO should make this unreachable; treat it as retryable
                    // so the create ahead of it gets another chance first.
                    return self.handle_retryable(entry, "awaiting server id for create");
                };
                let expected = entry.expected_version.unwrap_or(expense.version);
                self.remote
                    .update(remote_id, payload, expected, &entry.idempotency_key)
                    .await
            }
            Operation::Delete => {
                let Some(remote_id) = &expense.remote_id else {
                    return self.handle_retryable(entry, "awaiting server id for create");
                };
                self.remote.delete(remote_id, &entry.idempotency_key).await
            }
        };

        match result {
            Ok(MutationOutcome::Applied { expense: server, replayed }) => {
                self.handle_applied(entry, server.as_ref(), replayed)
            }
            Ok(MutationOutcome::Conflict { server }) => self.handle_conflict(entry, &server),
            Err(TransportError::Retryable { reason, .. }) => {
                self.handle_retryable(entry, &reason)
            }
            Err(TransportError::Rejected { status, reason }) => {
                warn!(
                    entry = entry.id,
                    expense = %entry.expense_id,
                    status,
                    "Mutation rejected, parking entry: {reason}"
                );
                self.park_rejected(entry, &reason)
            }
        }
    }

    /// Server acknowledged the mutation: settle the entry and the row
    fn handle_applied(
        &self,
        entry: &OutboxEntry,
        server: Option<&RemoteExpense>,
        replayed: bool,
    ) -> Result<EntryOutcome> {
        self.db.with_tx(|tx| {
            let outbox = SqliteOutboxRepository::new(tx);
            let expenses = SqliteExpenseRepository::new(tx);
            outbox.remove(entry.id)?;

            if entry.operation == Operation::Delete {
                expenses.remove(&entry.expense_id)?;
                return Ok(());
            }

            if let Some(mut local) = expenses.get(&entry.expense_id)? {
                if let Some(server) = server {
                    local.remote_id = Some(server.id.clone());
                }
                // Later queued mutations keep the row pending, with its
                // local version chain still ahead of the server's.
                if outbox.count_for_expense(&entry.expense_id)? > 0 {
                    local.sync_status = SyncStatus::Pending;
                } else {
                    local.sync_status = SyncStatus::Synced;
                    if let Some(server) = server {
                        local.version = server.version;
                    }
                }
                local.sync_attempts = 0;
                local.last_sync_error = None;
                expenses.put(&local)?;
            }
            Ok(())
        })?;
        debug!(entry = entry.id, expense = %entry.expense_id, replayed, "Mutation acknowledged");
        Ok(EntryOutcome::Acked { replayed })
    }

    /// Version conflict: resolve by last write wins
    ///
    /// When the local edit wins, the stale entry is replaced in the same
    /// transaction by a fresh update computed against the server's current
    /// version, so the winning value is pushed on the next sweep instead of
    /// being lost.
    fn handle_conflict(&self, entry: &OutboxEntry, server: &RemoteExpense) -> Result<EntryOutcome> {
        let now = self.clock.now_ms();
        self.db.with_tx(|tx| {
            let outbox = SqliteOutboxRepository::new(tx);
            let expenses = SqliteExpenseRepository::new(tx);
            let Some(local) = expenses.get(&entry.expense_id)? else {
                outbox.remove(entry.id)?;
                return Ok(());
            };

            match conflict::decide(local.local_updated_at, server.updated_at) {
                Winner::Server => {
                    debug!(expense = %entry.expense_id, "Conflict: adopting server record");
                    outbox.remove(entry.id)?;
                    expenses.put(&conflict::adopt_server(&local, server))?;
                }
                Winner::Local if entry.operation == Operation::Delete => {
                    debug!(expense = %entry.expense_id, "Conflict: local delete wins, re-pushing");
                    outbox.remove(entry.id)?;
                    outbox.enqueue(
                        NewOutboxEntry {
                            operation: Operation::Delete,
                            expense_id: entry.expense_id,
                            payload: None,
                            expected_version: Some(server.version),
                            idempotency_key: new_idempotency_key(now),
                        },
                        now,
                    )?;
                }
                Winner::Local => {
                    debug!(expense = %entry.expense_id, "Conflict: local edit wins, re-pushing");
                    let key = new_idempotency_key(now);
                    let superseded = conflict::supersede_server(&local, server, key.clone());
                    outbox.remove(entry.id)?;
                    outbox.enqueue(
                        NewOutboxEntry {
                            operation: Operation::Update,
                            expense_id: entry.expense_id,
                            payload: Some(serde_json::to_value(superseded.fields())?),
                            expected_version: Some(server.version),
                            idempotency_key: key,
                        },
                        now,
                    )?;
                    expenses.put(&superseded)?;
                }
            }
            Ok(())
        })?;
        Ok(EntryOutcome::ConflictResolved)
    }

    /// Transient failure: push the entry into the future with backoff
    fn handle_retryable(&self, entry: &OutboxEntry, reason: &str) -> Result<EntryOutcome> {
        let now = self.clock.now_ms();
        let attempts = entry.attempts + 1;
        let next_retry_at = self.config.backoff.next_retry_at(now, entry.attempts);
        debug!(
            entry = entry.id,
            expense = %entry.expense_id,
            attempts,
            next_retry_at,
            "Mutation failed, rescheduling: {reason}"
        );
        self.db.with_tx(|tx| {
            SqliteOutboxRepository::new(tx).reschedule(entry.id, attempts, next_retry_at)?;
            SqliteExpenseRepository::new(tx).mark_error(&entry.expense_id, attempts, reason)
        })?;
        Ok(EntryOutcome::Rescheduled)
    }

    /// Non-retryable rejection: park the entry until a user-triggered retry
    fn park_rejected(&self, entry: &OutboxEntry, reason: &str) -> Result<EntryOutcome> {
        let attempts = entry.attempts + 1;
        self.db.with_tx(|tx| {
            SqliteOutboxRepository::new(tx).mark_terminal(entry.id, attempts)?;
            SqliteExpenseRepository::new(tx).mark_error(&entry.expense_id, attempts, reason)
        })?;
        Ok(EntryOutcome::Rejected)
    }

    fn park_malformed(&self, entry: &OutboxEntry, reason: &str) -> Result<EntryOutcome> {
        warn!(entry = entry.id, "Malformed outbox entry: {reason}");
        self.park_rejected(entry, reason)
    }

    fn record_sweep(&self, stats: &SyncStats) -> Result<()> {
        let now = self.clock.now_ms();
        let fully_flushed = stats.remaining == 0;
        self.db.with_conn(|conn| {
            let repo = SqliteMetaRepository::new(conn);
            let previous = MetadataRepository::get(&repo, &self.config.user_id)?;
            let meta = SyncMetadata {
                user_id: self.config.user_id.clone(),
                last_sync_at: now,
                last_successful_sync: if fully_flushed {
                    now
                } else {
                    previous.map_or(0, |m| m.last_successful_sync)
                },
                pending_count: stats.remaining,
            };
            repo.put(&meta)
        })
    }
}
