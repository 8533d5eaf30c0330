use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] pocketbook_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No user configured. Pass --user or set POCKETBOOK_USER.")]
    NoUser,
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("{0}")]
    InvalidField(String),
    #[error("Expense not found for id/prefix: {0}")]
    ExpenseNotFound(String),
    #[error("{0}")]
    AmbiguousExpenseId(String),
    #[error("Refusing to wipe local data with {0} unsynced mutation(s). Run `pocketbook sync` first, or pass --force.")]
    UnsyncedData(u64),
}
