//! Sync metadata and response-cache repositories

use crate::error::Result;
use crate::models::{CacheEntry, SyncMetadata};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for sync bookkeeping rows
pub trait MetadataRepository {
    fn get(&self, user_id: &str) -> Result<Option<SyncMetadata>>;

    fn put(&self, meta: &SyncMetadata) -> Result<()>;
}

/// Trait for the generic response cache
pub trait CacheRepository {
    /// Get a live cache entry; expired entries read as absent
    fn get(&self, key: &str, now_ms: i64) -> Result<Option<CacheEntry>>;

    fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Drop every expired entry, returning how many were removed
    fn purge_expired(&self, now_ms: i64) -> Result<u64>;
}

/// `SQLite` implementation of both bookkeeping repositories
pub struct SqliteMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetadataRepository for SqliteMetaRepository<'_> {
    fn get(&self, user_id: &str) -> Result<Option<SyncMetadata>> {
        let meta = self
            .conn
            .query_row(
                "SELECT user_id, last_sync_at, last_successful_sync, pending_count
                 FROM sync_metadata WHERE user_id = ?",
                params![user_id],
                |row| {
                    Ok(SyncMetadata {
                        user_id: row.get(0)?,
                        last_sync_at: row.get(1)?,
                        last_successful_sync: row.get(2)?,
                        pending_count: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    fn put(&self, meta: &SyncMetadata) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_metadata
                 (user_id, last_sync_at, last_successful_sync, pending_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                meta.user_id,
                meta.last_sync_at,
                meta.last_successful_sync,
                meta.pending_count,
            ],
        )?;
        Ok(())
    }
}

impl CacheRepository for SqliteMetaRepository<'_> {
    fn get(&self, key: &str, now_ms: i64) -> Result<Option<CacheEntry>> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT data, expires FROM cache WHERE key = ? ",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, expires)) if expires <= now_ms => Ok(None),
            Some((data, expires)) => Ok(Some(CacheEntry {
                key: key.to_string(),
                data: serde_json::from_str(&data)?,
                expires,
            })),
            None => Ok(None),
        }
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cache (key, data, expires) VALUES (?1, ?2, ?3)",
            params![entry.key, entry.data.to_string(), entry.expires],
        )?;
        Ok(())
    }

    fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM cache WHERE expires <= ?", params![now_ms])?;
        Ok(rows as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_metadata_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteMetaRepository::new(conn);
            assert!(MetadataRepository::get(&repo, "user-1")?.is_none());

            let meta = SyncMetadata {
                user_id: "user-1".to_string(),
                last_sync_at: 5_000,
                last_successful_sync: 4_000,
                pending_count: 3,
            };
            MetadataRepository::put(&repo, &meta)?;
            assert_eq!(MetadataRepository::get(&repo, "user-1")?, Some(meta));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cache_expiry() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = SqliteMetaRepository::new(conn);
            let entry = CacheEntry {
                key: "expenses:user-1".to_string(),
                data: serde_json::json!([{ "amount": 10.0 }]),
                expires: 5_000,
            };
            CacheRepository::put(&repo, &entry)?;

            assert!(CacheRepository::get(&repo, "expenses:user-1", 4_999)?.is_some());
            assert!(CacheRepository::get(&repo, "expenses:user-1", 5_000)?.is_none());

            assert_eq!(repo.purge_expired(5_000)?, 1);
            Ok(())
        })
        .unwrap();
    }
}
