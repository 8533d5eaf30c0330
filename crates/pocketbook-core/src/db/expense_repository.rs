//! Expense repository implementation

use crate::error::{Error, Result};
use crate::models::{Expense, ExpenseId, SyncStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::str::FromStr;

/// Trait for expense storage operations
pub trait ExpenseRepository {
    /// Insert or replace an expense row
    fn put(&self, expense: &Expense) -> Result<()>;

    /// Get an expense by local ID, including soft-deleted rows
    fn get(&self, id: &ExpenseId) -> Result<Option<Expense>>;

    /// Hard-remove an expense row (server-confirmed deletion only)
    fn remove(&self, id: &ExpenseId) -> Result<()>;

    /// Soft-delete: hide from queries, keep the row for the delete drain
    fn mark_deleted(&self, id: &ExpenseId, now_ms: i64, idempotency_key: &str) -> Result<()>;

    /// List a user's visible expenses, newest first, optionally date-bounded
    fn query_by_user_and_range(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Expense>>;

    /// Number of rows for a user, soft-deleted included (cold-start check)
    fn count_for_user(&self, user_id: &str) -> Result<u64>;

    /// Flag the row while its mutation is in flight
    fn mark_syncing(&self, id: &ExpenseId) -> Result<()>;

    /// Record server acknowledgment, adopting the remote ID when given
    fn mark_synced(&self, id: &ExpenseId, remote_id: Option<&str>) -> Result<()>;

    /// Record a failed push attempt
    fn mark_error(&self, id: &ExpenseId, attempts: u32, reason: &str) -> Result<()>;

    /// Flip every errored row back to pending (user-triggered retry)
    fn reset_errors_to_pending(&self) -> Result<u64>;

    /// Number of rows currently in the error state
    fn count_errors(&self) -> Result<u64>;
}

/// `SQLite` implementation of `ExpenseRepository`
pub struct SqliteExpenseRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteExpenseRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an expense from a database row
    fn parse_expense(row: &rusqlite::Row<'_>) -> rusqlite::Result<Expense> {
        let id: String = row.get(0)?;
        let date_ms: i64 = row.get(3)?;
        let category: String = row.get(4)?;
        let kind: String = row.get(5)?;
        let payment_method: String = row.get(6)?;
        let sync_status: String = row.get(10)?;

        Ok(Expense {
            id: id.parse().unwrap_or_default(),
            remote_id: row.get(1)?,
            user_id: row.get(2)?,
            date: DateTime::from_timestamp_millis(date_ms).unwrap_or(DateTime::UNIX_EPOCH),
            category: parse_enum(4, &category)?,
            kind: parse_enum(5, &kind)?,
            payment_method: parse_enum(6, &payment_method)?,
            description: row.get(7)?,
            amount: row.get(8)?,
            is_deleted: row.get::<_, i32>(9)? != 0,
            sync_status: parse_enum(10, &sync_status)?,
            local_created_at: row.get(11)?,
            local_updated_at: row.get(12)?,
            sync_attempts: row.get(13)?,
            last_sync_error: row.get(14)?,
            version: row.get(15)?,
            idempotency_key: row.get(16)?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, remote_id, user_id, date, category, kind, payment_method, \
     description, amount, is_deleted, sync_status, local_created_at, local_updated_at, \
     sync_attempts, last_sync_error, version, idempotency_key";

fn parse_enum<T: FromStr<Err = String>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value.parse().map_err(|message: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            message.into(),
        )
    })
}

impl ExpenseRepository for SqliteExpenseRepository<'_> {
    fn put(&self, expense: &Expense) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO expenses (
                id, remote_id, user_id, date, category, kind, payment_method,
                description, amount, is_deleted, sync_status, local_created_at,
                local_updated_at, sync_attempts, last_sync_error, version, idempotency_key
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                expense.id.as_str(),
                expense.remote_id,
                expense.user_id,
                expense.date.timestamp_millis(),
                expense.category.as_str(),
                expense.kind.as_str(),
                expense.payment_method.as_str(),
                expense.description,
                expense.amount,
                i32::from(expense.is_deleted),
                expense.sync_status.as_str(),
                expense.local_created_at,
                expense.local_updated_at,
                expense.sync_attempts,
                expense.last_sync_error,
                expense.version,
                expense.idempotency_key,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &ExpenseId) -> Result<Option<Expense>> {
        let result = self.conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM expenses WHERE id = ?"),
            params![id.as_str()],
            Self::parse_expense,
        );

        match result {
            Ok(expense) => Ok(Some(expense)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, id: &ExpenseId) -> Result<()> {
        self.conn
            .execute("DELETE FROM expenses WHERE id = ?", params![id.as_str()])?;
        Ok(())
    }

    fn mark_deleted(&self, id: &ExpenseId, now_ms: i64, idempotency_key: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE expenses
             SET is_deleted = 1, sync_status = 'pending', local_updated_at = ?1,
                 idempotency_key = ?2
             WHERE id = ?3",
            params![now_ms, idempotency_key, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    fn query_by_user_and_range(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Expense>> {
        let start_ms = start.map_or(i64::MIN, |t| t.timestamp_millis());
        let end_ms = end.map_or(i64::MAX, |t| t.timestamp_millis());

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM expenses
             WHERE user_id = ?1 AND is_deleted = 0 AND date BETWEEN ?2 AND ?3
             ORDER BY date DESC, local_created_at DESC"
        ))?;

        let expenses = stmt
            .query_map(params![user_id, start_ms, end_ms], Self::parse_expense)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(expenses)
    }

    fn count_for_user(&self, user_id: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM expenses WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    fn mark_syncing(&self, id: &ExpenseId) -> Result<()> {
        self.conn.execute(
            "UPDATE expenses SET sync_status = 'syncing' WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn mark_synced(&self, id: &ExpenseId, remote_id: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE expenses
             SET sync_status = 'synced',
                 sync_attempts = 0,
                 last_sync_error = NULL,
                 remote_id = COALESCE(?1, remote_id)
             WHERE id = ?2",
            params![remote_id, id.as_str()],
        )?;
        Ok(())
    }

    fn mark_error(&self, id: &ExpenseId, attempts: u32, reason: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE expenses
             SET sync_status = 'error', sync_attempts = ?1, last_sync_error = ?2
             WHERE id = ?3",
            params![attempts, reason, id.as_str()],
        )?;
        Ok(())
    }

    fn reset_errors_to_pending(&self) -> Result<u64> {
        let rows = self.conn.execute(
            "UPDATE expenses
             SET sync_status = 'pending', sync_attempts = 0, last_sync_error = NULL
             WHERE sync_status = 'error'",
            [],
        )?;
        Ok(rows as u64)
    }

    fn count_errors(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM expenses WHERE sync_status = 'error'",
            [],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }
}
