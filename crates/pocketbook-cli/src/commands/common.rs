use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pocketbook_core::db::Database;
use pocketbook_core::models::SyncStatus;
use pocketbook_core::sync::{HttpRemoteService, SyncConfig, SyncEngine, SystemClock};
use pocketbook_core::{Expense, ExpenseId, ExpenseStore};
use serde::Serialize;

use crate::error::CliError;

/// Default endpoint for a locally running server
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8787";

pub type Store = Arc<ExpenseStore<HttpRemoteService>>;

#[derive(Debug, Serialize)]
pub struct ExpenseListItem {
    pub id: String,
    pub date: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payment_method: String,
    pub description: String,
    pub amount: f64,
    pub sync_status: String,
    pub last_sync_error: Option<String>,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_db_path {
        return path;
    }
    if let Ok(path) = env::var("POCKETBOOK_DB_PATH") {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pocketbook")
        .join("pocketbook.db")
}

pub fn resolve_server(cli_server: Option<String>) -> String {
    cli_server
        .or_else(|| env::var("POCKETBOOK_SERVER_URL").ok())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}

pub fn resolve_user(cli_user: Option<String>) -> Result<String, CliError> {
    cli_user
        .or_else(|| env::var("POCKETBOOK_USER").ok())
        .filter(|user| !user.trim().is_empty())
        .ok_or(CliError::NoUser)
}

/// Open the local store against the configured server
///
/// Unreachable servers are not an error here: mutations queue locally and
/// drain whenever a sync gets through.
pub fn open_store(db_path: &std::path::Path, server: &str, user: &str) -> Result<Store, CliError> {
    let db = Arc::new(Database::open(db_path)?);
    let remote = Arc::new(HttpRemoteService::new(server, Duration::from_secs(10))?);
    let engine = Arc::new(SyncEngine::new(
        db,
        remote,
        Arc::new(SystemClock),
        SyncConfig::new(user),
    ));
    let store = Arc::new(ExpenseStore::new(engine));
    store.publish()?;
    Ok(store)
}

/// Parse YYYY-MM-DD as midnight UTC
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, CliError> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(raw.to_string()))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| CliError::InvalidDate(raw.to_string()))
}

/// Parse YYYY-MM-DD as the last instant of that day, for inclusive ranges
pub fn parse_date_end(raw: &str) -> Result<DateTime<Utc>, CliError> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(raw.to_string()))?;
    date.and_hms_milli_opt(23, 59, 59, 999)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| CliError::InvalidDate(raw.to_string()))
}

/// Parse an enum-backed field (category, type, payment method)
pub fn parse_field<T: FromStr<Err = String>>(value: &str) -> Result<T, CliError> {
    value.parse().map_err(CliError::InvalidField)
}

/// Find an expense by full ID or unique ID prefix
pub fn resolve_expense(store: &Store, query: &str) -> Result<Expense, CliError> {
    if query.trim().is_empty() {
        return Err(CliError::ExpenseNotFound(query.to_string()));
    }

    if let Ok(id) = query.parse::<ExpenseId>() {
        if let Some(expense) = store.get_expense(&id)? {
            return Ok(expense);
        }
    }

    store.publish()?;
    let snapshot = store.snapshot();
    let matches: Vec<&Expense> = snapshot
        .expenses
        .iter()
        .filter(|expense| expense.id.as_str().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::ExpenseNotFound(query.to_string())),
        1 => Ok(matches[0].clone()),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|expense| expense.id.as_str().chars().take(8).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousExpenseId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn expense_to_list_item(expense: &Expense) -> ExpenseListItem {
    ExpenseListItem {
        id: expense.id.as_str(),
        date: expense.date.format("%Y-%m-%d").to_string(),
        category: expense.category.as_str().to_string(),
        kind: expense.kind.as_str().to_string(),
        payment_method: expense.payment_method.as_str().to_string(),
        description: expense.description.clone(),
        amount: expense.amount,
        sync_status: expense.sync_status.as_str().to_string(),
        last_sync_error: expense.last_sync_error.clone(),
    }
}

pub fn format_expense_lines(expenses: &[Expense]) -> Vec<String> {
    expenses
        .iter()
        .map(|expense| {
            let short_id = expense.id.as_str().chars().take(8).collect::<String>();
            let date = expense.date.format("%Y-%m-%d");
            let marker = match expense.sync_status {
                SyncStatus::Synced => String::new(),
                SyncStatus::Error => " [sync failed]".to_string(),
                _ => " [pending]".to_string(),
            };
            format!(
                "{short_id}  {date}  {:<10}  {:>10.2}  {}{marker}",
                expense.category.as_str(),
                expense.amount,
                expense.description,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use pocketbook_core::models::{Category, ExpenseFields, ExpenseKind, PaymentMethod};
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_dates_at_day_boundaries() {
        let start = parse_date("2025-06-01").unwrap();
        assert_eq!(start.hour(), 0);
        let end = parse_date_end("2025-06-01").unwrap();
        assert_eq!(end.hour(), 23);
        assert!(end > start);

        assert!(matches!(parse_date("junk"), Err(CliError::InvalidDate(_))));
        assert!(matches!(
            parse_date("2025-13-01"),
            Err(CliError::InvalidDate(_))
        ));
    }

    #[test]
    fn parses_enum_fields() {
        assert_eq!(parse_field::<Category>("Grocery").unwrap(), Category::Grocery);
        assert_eq!(parse_field::<PaymentMethod>("UPI").unwrap(), PaymentMethod::Upi);
        assert!(parse_field::<Category>("Groceries").is_err());
    }

    #[test]
    fn list_lines_flag_unsynced_rows() {
        let fields = ExpenseFields {
            user_id: "user-1".to_string(),
            date: parse_date("2025-06-01").unwrap(),
            category: Category::Lunch,
            kind: ExpenseKind::Personal,
            payment_method: PaymentMethod::Cash,
            description: "Thali".to_string(),
            amount: 120.0,
        };
        let expense = Expense::new(fields, 1_000, "key".to_string());

        let lines = format_expense_lines(std::slice::from_ref(&expense));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Thali"));
        assert!(lines[0].ends_with("[pending]"));
    }
}
