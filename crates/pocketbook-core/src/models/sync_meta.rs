//! Sync bookkeeping and response-cache models

use serde::{Deserialize, Serialize};

/// Coarse sync summary, one row per user
///
/// `pending_count` here is a display cache; the authoritative count is
/// always `count(outbox)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub user_id: String,
    /// Last drain attempt (Unix ms)
    pub last_sync_at: i64,
    /// Last drain that left the outbox empty (Unix ms)
    pub last_successful_sync: i64,
    pub pending_count: u64,
}

/// A memoized read response with an expiry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub data: serde_json::Value,
    /// Unix ms; the entry is dead once this has passed
    pub expires: i64,
}

impl CacheEntry {
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.expires <= now_ms
    }
}
