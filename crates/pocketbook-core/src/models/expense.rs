//! Expense model with sync metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for an expense, using UUID v7 (time-sortable)
///
/// Client-generated, permanent, never reused. The server assigns its own
/// identifier after the first successful sync; this one keeps UI references
/// stable across that transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(Uuid);

impl ExpenseId {
    /// Create a new unique expense ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ExpenseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExpenseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Sync lifecycle state of an expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Mutation recorded locally, not yet pushed
    Pending,
    /// A push for this expense is in flight
    Syncing,
    /// Server has acknowledged the latest local mutation
    Synced,
    /// Last push failed; queued for retry
    Error,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "error" => Ok(Self::Error),
            other => Err(format!("Unknown sync status: {other}")),
        }
    }
}

/// Expense category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Grocery,
    Breakfast,
    Lunch,
    Dinner,
    Travel,
    Snacks,
    Personal,
    Shared,
    Extras,
}

impl Category {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grocery => "Grocery",
            Self::Breakfast => "Breakfast",
            Self::Lunch => "Lunch",
            Self::Dinner => "Dinner",
            Self::Travel => "Travel",
            Self::Snacks => "Snacks",
            Self::Personal => "Personal",
            Self::Shared => "Shared",
            Self::Extras => "Extras",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Grocery" => Ok(Self::Grocery),
            "Breakfast" => Ok(Self::Breakfast),
            "Lunch" => Ok(Self::Lunch),
            "Dinner" => Ok(Self::Dinner),
            "Travel" => Ok(Self::Travel),
            "Snacks" => Ok(Self::Snacks),
            "Personal" => Ok(Self::Personal),
            "Shared" => Ok(Self::Shared),
            "Extras" => Ok(Self::Extras),
            other => Err(format!("Unknown category: {other}")),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an expense belongs to the user alone or is split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseKind {
    Personal,
    Shared,
}

impl ExpenseKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Shared => "shared",
        }
    }
}

impl FromStr for ExpenseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "shared" => Ok(Self::Shared),
            other => Err(format!("Unknown expense kind: {other}")),
        }
    }
}

/// Payment method used for an expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "UPI")]
    Upi,
    Cash,
    Card,
    Bank,
}

impl PaymentMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Upi => "UPI",
            Self::Cash => "Cash",
            Self::Card => "Card",
            Self::Bank => "Bank",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPI" => Ok(Self::Upi),
            "Cash" => Ok(Self::Cash),
            "Card" => Ok(Self::Card),
            "Bank" => Ok(Self::Bank),
            other => Err(format!("Unknown payment method: {other}")),
        }
    }
}

/// Domain fields of an expense, without identity or sync metadata
///
/// This is what a user submits and what gets snapshotted into the outbox;
/// the serialized form doubles as the request body pushed to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseFields {
    pub user_id: String,
    pub date: DateTime<Utc>,
    pub category: Category,
    #[serde(rename = "type")]
    pub kind: ExpenseKind,
    pub payment_method: PaymentMethod,
    pub description: String,
    pub amount: f64,
}

/// An expense in the local durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// Client-generated, permanent identifier
    pub id: ExpenseId,
    /// Server-assigned identifier, present once the create has synced
    pub remote_id: Option<String>,
    pub user_id: String,
    pub date: DateTime<Utc>,
    pub category: Category,
    pub kind: ExpenseKind,
    pub payment_method: PaymentMethod,
    pub description: String,
    pub amount: f64,
    /// Soft-delete flag; the row survives until the server confirms deletion
    pub is_deleted: bool,

    // Sync metadata
    pub sync_status: SyncStatus,
    /// Creation timestamp (Unix ms, local clock)
    pub local_created_at: i64,
    /// Last local mutation timestamp (Unix ms)
    pub local_updated_at: i64,
    pub sync_attempts: u32,
    pub last_sync_error: Option<String>,
    /// Monotonic counter for optimistic-concurrency against the server
    pub version: i64,
    /// Idempotency key of the most recent mutation group
    pub idempotency_key: String,
}

impl Expense {
    /// Create a new pending expense from submitted fields
    #[must_use]
    pub fn new(fields: ExpenseFields, now_ms: i64, idempotency_key: String) -> Self {
        Self {
            id: ExpenseId::new(),
            remote_id: None,
            user_id: fields.user_id,
            date: fields.date,
            category: fields.category,
            kind: fields.kind,
            payment_method: fields.payment_method,
            description: fields.description,
            amount: fields.amount,
            is_deleted: false,
            sync_status: SyncStatus::Pending,
            local_created_at: now_ms,
            local_updated_at: now_ms,
            sync_attempts: 0,
            last_sync_error: None,
            version: 1,
            idempotency_key,
        }
    }

    /// Domain fields of this expense, as pushed to the server
    #[must_use]
    pub fn fields(&self) -> ExpenseFields {
        ExpenseFields {
            user_id: self.user_id.clone(),
            date: self.date,
            category: self.category,
            kind: self.kind,
            payment_method: self.payment_method,
            description: self.description.clone(),
            amount: self.amount,
        }
    }
}
