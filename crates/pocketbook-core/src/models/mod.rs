//! Data models for Pocketbook

mod expense;
mod outbox;
mod sync_meta;

pub use expense::{
    Category, Expense, ExpenseFields, ExpenseId, ExpenseKind, PaymentMethod, SyncStatus,
};
pub use outbox::{new_idempotency_key, Operation, OutboxEntry};
pub use sync_meta::{CacheEntry, SyncMetadata};
