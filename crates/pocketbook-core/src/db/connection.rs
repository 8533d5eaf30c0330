//! Database connection management

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;

use super::migrations;

/// Wrapper around a single `SQLite` connection
///
/// One connection behind a mutex: local writes are short and the rest of
/// the system is cooperative, so a single writer is the simplest way to keep
/// entity rows and their outbox entries from being observed half-written.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read or single-statement write against the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Database("connection mutex poisoned".to_string()))?;
        f(&conn)
    }

    /// Run several statements as one transaction
    ///
    /// This is how an entity write and its outbox enqueue stay atomic: both
    /// repositories operate on the same transaction handle.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Database("connection mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Wipe all four logical tables in one transaction (logout path)
    ///
    /// Either everything is cleared or nothing is.
    pub fn clear_all(&self) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM expenses", [])?;
            tx.execute("DELETE FROM outbox", [])?;
            tx.execute("DELETE FROM sync_metadata", [])?;
            tx.execute("DELETE FROM cache", [])?;
            Ok(())
        })?;
        tracing::info!("Cleared all local data");
        Ok(())
    }
}
