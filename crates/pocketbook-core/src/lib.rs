//! pocketbook-core - Core library for Pocketbook
//!
//! This crate contains the shared models, database layer, and sync engine
//! behind the offline-first expense tracker. Every mutation is written to
//! the local store and an outbox queue in one transaction; a background
//! engine drains the queue to the server with retries, idempotent replay,
//! and last-write-wins conflict resolution.

pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use models::{Expense, ExpenseFields, ExpenseId};
pub use store::{ExpenseStore, StoreSnapshot, SyncStatusReport};
