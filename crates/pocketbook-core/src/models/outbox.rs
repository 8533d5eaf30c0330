//! Outbox entry model: one pending mutation intent

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ExpenseId;

/// Kind of mutation waiting in the outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("Unknown operation: {other}")),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record of one pending mutation
///
/// The row id is an SQLite AUTOINCREMENT integer, so id order is enqueue
/// order; the drain path relies on that for per-expense FIFO.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub operation: Operation,
    pub expense_id: ExpenseId,
    /// Field snapshot at enqueue time; `None` for deletes
    pub payload: Option<serde_json::Value>,
    /// Server version this mutation was computed against (updates only)
    pub expected_version: Option<i64>,
    pub idempotency_key: String,
    pub attempts: u32,
    /// Unix ms; the entry is eligible for drain once this has passed
    pub next_retry_at: i64,
    pub created_at: i64,
    /// Set when the server rejected the payload outright; excluded from the
    /// due view until a user-triggered retry resets it
    pub terminal: bool,
}

/// Build a fresh idempotency key: timestamp plus random suffix
///
/// Unique per logical write; the server deduplicates mutations by this value.
#[must_use]
pub fn new_idempotency_key(now_ms: i64) -> String {
    format!("{now_ms}-{}", Uuid::new_v4())
}
