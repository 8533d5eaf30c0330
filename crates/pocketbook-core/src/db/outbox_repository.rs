//! Outbox repository: the durable sync queue

use crate::error::Result;
use crate::models::{ExpenseId, Operation, OutboxEntry};
use rusqlite::{params, Connection, OptionalExtension};

/// A mutation intent about to be enqueued
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub operation: Operation,
    pub expense_id: ExpenseId,
    pub payload: Option<serde_json::Value>,
    pub expected_version: Option<i64>,
    pub idempotency_key: String,
}

/// Trait for sync-queue storage operations
pub trait OutboxRepository {
    /// Append a mutation; due immediately, zero attempts
    fn enqueue(&self, entry: NewOutboxEntry, now_ms: i64) -> Result<i64>;

    /// Entries eligible for drain at `now`, oldest first
    ///
    /// Per-expense FIFO: an entry is only due when it is the oldest entry
    /// for its expense, so an update can never reach the server before the
    /// create it depends on.
    fn due_entries(&self, now_ms: i64) -> Result<Vec<OutboxEntry>>;

    /// Get a single entry by id
    fn get(&self, id: i64) -> Result<Option<OutboxEntry>>;

    /// Push an entry into the future after a retryable failure
    fn reschedule(&self, id: i64, attempts: u32, next_retry_at: i64) -> Result<()>;

    /// Park an entry after a non-retryable rejection; only a user-triggered
    /// retry revives it
    fn mark_terminal(&self, id: i64, attempts: u32) -> Result<()>;

    /// Remove an acknowledged entry; no-op if already removed
    fn remove(&self, id: i64) -> Result<()>;

    /// Authoritative pending count
    fn count(&self) -> Result<u64>;

    /// Queued mutations for one expense
    fn count_for_expense(&self, expense_id: &ExpenseId) -> Result<u64>;

    /// Re-arm parked and errored entries for an immediate drain
    /// (user-triggered retry); healthy entries keep their schedule
    fn reset_for_retry(&self, now_ms: i64) -> Result<u64>;
}

/// `SQLite` implementation of `OutboxRepository`
pub struct SqliteOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an outbox entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
        let operation: String = row.get(1)?;
        let expense_id: String = row.get(2)?;
        let payload: Option<String> = row.get(3)?;

        Ok(OutboxEntry {
            id: row.get(0)?,
            operation: operation.parse().map_err(|message: String| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    message.into(),
                )
            })?,
            expense_id: expense_id.parse().unwrap_or_default(),
            payload: payload
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
            expected_version: row.get(4)?,
            idempotency_key: row.get(5)?,
            attempts: row.get(6)?,
            next_retry_at: row.get(7)?,
            created_at: row.get(8)?,
            terminal: row.get::<_, i32>(9)? != 0,
        })
    }
}

const SELECT_COLUMNS: &str = "id, operation, expense_id, payload, expected_version, \
     idempotency_key, attempts, next_retry_at, created_at, terminal";

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn enqueue(&self, entry: NewOutboxEntry, now_ms: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO outbox (
                operation, expense_id, payload, expected_version,
                idempotency_key, attempts, next_retry_at, created_at, terminal
             ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6, 0)",
            params![
                entry.operation.as_str(),
                entry.expense_id.as_str(),
                entry.payload.map(|value| value.to_string()),
                entry.expected_version,
                entry.idempotency_key,
                now_ms,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn due_entries(&self, now_ms: i64) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox o
             WHERE o.next_retry_at <= ?1
               AND o.terminal = 0
               AND NOT EXISTS (
                   SELECT 1 FROM outbox earlier
                   WHERE earlier.expense_id = o.expense_id AND earlier.id < o.id
               )
             ORDER BY o.id ASC"
        ))?;

        let entries = stmt
            .query_map(params![now_ms], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn get(&self, id: i64) -> Result<Option<OutboxEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM outbox WHERE id = ?"),
                params![id],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn reschedule(&self, id: i64, attempts: u32, next_retry_at: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE outbox SET attempts = ?1, next_retry_at = ?2 WHERE id = ?3",
            params![attempts, next_retry_at, id],
        )?;
        Ok(())
    }

    fn mark_terminal(&self, id: i64, attempts: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE outbox SET attempts = ?1, terminal = 1 WHERE id = ?2",
            params![attempts, id],
        )?;
        Ok(())
    }

    fn remove(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM outbox WHERE id = ?", params![id])?;
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    fn count_for_expense(&self, expense_id: &ExpenseId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE expense_id = ?",
            params![expense_id.as_str()],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    fn reset_for_retry(&self, now_ms: i64) -> Result<u64> {
        let rows = self.conn.execute(
            "UPDATE outbox SET attempts = 0, terminal = 0, next_retry_at = ?
             WHERE terminal = 1 OR attempts > 0",
            params![now_ms],
        )?;
        Ok(rows as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn entry_for(expense_id: ExpenseId, operation: Operation, key: &str) -> NewOutboxEntry {
        NewOutboxEntry {
            operation,
            expense_id,
            payload: Some(serde_json::json!({ "amount": 500.0 })),
            expected_version: None,
            idempotency_key: key.to_string(),
        }
    }

    #[test]
    fn test_enqueue_and_due_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteOutboxRepository::new(conn);
            let expense_id = ExpenseId::new();

            let id = repo.enqueue(entry_for(expense_id, Operation::Create, "k1"), 1_000)?;
            let due = repo.due_entries(1_000)?;

            assert_eq!(due.len(), 1);
            assert_eq!(due[0].id, id);
            assert_eq!(due[0].operation, Operation::Create);
            assert_eq!(due[0].expense_id, expense_id);
            assert_eq!(due[0].attempts, 0);
            assert_eq!(due[0].next_retry_at, 1_000);
            assert!(!due[0].terminal);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_fifo_per_expense() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteOutboxRepository::new(conn);
            let expense_a = ExpenseId::new();
            let expense_b = ExpenseId::new();

            let create_a = repo.enqueue(entry_for(expense_a, Operation::Create, "k1"), 1_000)?;
            repo.enqueue(entry_for(expense_a, Operation::Update, "k2"), 1_000)?;
            let create_b = repo.enqueue(entry_for(expense_b, Operation::Create, "k3"), 1_000)?;

            // Only the head entry per expense is due, even though all three
            // have passed their retry time.
            let due = repo.due_entries(2_000)?;
            let ids: Vec<i64> = due.iter().map(|entry| entry.id).collect();
            assert_eq!(ids, vec![create_a, create_b]);

            // Once the create is acknowledged the update becomes due.
            repo.remove(create_a)?;
            let due = repo.due_entries(2_000)?;
            assert_eq!(due.len(), 2);
            assert_eq!(due[0].operation, Operation::Update);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_head_of_line_blocks_successor() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteOutboxRepository::new(conn);
            let expense_id = ExpenseId::new();

            let create = repo.enqueue(entry_for(expense_id, Operation::Create, "k1"), 1_000)?;
            repo.enqueue(entry_for(expense_id, Operation::Delete, "k2"), 1_000)?;

            // Create failed and was pushed into the future; the delete behind
            // it must not jump the queue.
            repo.reschedule(create, 1, 10_000)?;
            let due = repo.due_entries(5_000)?;
            assert!(due.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_terminal_entries_sit_out_until_reset() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteOutboxRepository::new(conn);
            let expense_id = ExpenseId::new();

            let id = repo.enqueue(entry_for(expense_id, Operation::Create, "k1"), 1_000)?;
            repo.mark_terminal(id, 1)?;

            assert!(repo.due_entries(100_000)?.is_empty());
            // Never dropped, still counted as pending work
            assert_eq!(repo.count()?, 1);

            let reset = repo.reset_for_retry(2_000)?;
            assert_eq!(reset, 1);
            let due = repo.due_entries(2_000)?;
            assert_eq!(due.len(), 1);
            assert_eq!(due[0].attempts, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reset_leaves_healthy_entries_alone() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteOutboxRepository::new(conn);

            let healthy = repo.enqueue(entry_for(ExpenseId::new(), Operation::Create, "k1"), 1_000)?;
            let failing = repo.enqueue(entry_for(ExpenseId::new(), Operation::Create, "k2"), 1_000)?;
            let parked = repo.enqueue(entry_for(ExpenseId::new(), Operation::Create, "k3"), 1_000)?;
            repo.reschedule(failing, 3, 50_000)?;
            repo.mark_terminal(parked, 1)?;

            // Only the errored and parked entries are re-armed.
            assert_eq!(repo.reset_for_retry(2_000)?, 2);

            let untouched = repo.get(healthy)?.unwrap();
            assert_eq!(untouched.attempts, 0);
            assert_eq!(untouched.next_retry_at, 1_000);
            assert_eq!(repo.get(failing)?.unwrap().next_retry_at, 2_000);
            assert!(!repo.get(parked)?.unwrap().terminal);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_remove_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteOutboxRepository::new(conn);
            let id = repo.enqueue(entry_for(ExpenseId::new(), Operation::Create, "k1"), 1_000)?;

            repo.remove(id)?;
            repo.remove(id)?;
            assert_eq!(repo.count()?, 0);
            Ok(())
        })
        .unwrap();
    }
}
