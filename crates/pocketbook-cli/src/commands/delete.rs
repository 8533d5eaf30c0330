use crate::commands::common::{resolve_expense, Store};
use crate::error::CliError;

pub async fn run_delete(store: &Store, id: &str) -> Result<(), CliError> {
    let expense = resolve_expense(store, id)?;
    store.delete_expense(&expense.id)?;
    println!("Deleted {}", expense.id);
    Ok(())
}
