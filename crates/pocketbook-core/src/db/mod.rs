//! Database layer for Pocketbook

mod connection;
mod expense_repository;
mod meta_repository;
mod migrations;
mod outbox_repository;

pub use connection::Database;
pub use expense_repository::{ExpenseRepository, SqliteExpenseRepository};
pub use meta_repository::{CacheRepository, MetadataRepository, SqliteMetaRepository};
pub use outbox_repository::{NewOutboxEntry, OutboxRepository, SqliteOutboxRepository};
