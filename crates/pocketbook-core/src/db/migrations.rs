//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: initial schema
///
/// Four logical tables: entity rows, the mutation outbox, per-user sync
/// bookkeeping, and a generic response cache.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            remote_id TEXT,
            user_id TEXT NOT NULL,
            date INTEGER NOT NULL,
            category TEXT NOT NULL,
            kind TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            description TEXT NOT NULL,
            amount REAL NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL,
            local_created_at INTEGER NOT NULL,
            local_updated_at INTEGER NOT NULL,
            sync_attempts INTEGER NOT NULL DEFAULT 0,
            last_sync_error TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            idempotency_key TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_expenses_remote ON expenses(remote_id);
        CREATE INDEX IF NOT EXISTS idx_expenses_user_date ON expenses(user_id, date DESC);
        CREATE INDEX IF NOT EXISTS idx_expenses_user_status ON expenses(user_id, sync_status);
        CREATE INDEX IF NOT EXISTS idx_expenses_status ON expenses(sync_status);

        CREATE TABLE IF NOT EXISTS outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            expense_id TEXT NOT NULL,
            payload TEXT,
            expected_version INTEGER,
            idempotency_key TEXT NOT NULL UNIQUE,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            terminal INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_expense ON outbox(expense_id);
        CREATE INDEX IF NOT EXISTS idx_outbox_due ON outbox(next_retry_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_operation ON outbox(operation);

        CREATE TABLE IF NOT EXISTS sync_metadata (
            user_id TEXT PRIMARY KEY,
            last_sync_at INTEGER NOT NULL,
            last_successful_sync INTEGER NOT NULL,
            pending_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache (
            key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            expires INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);

        COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }
}
