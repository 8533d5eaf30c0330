use chrono::DateTime;

use crate::commands::common::Store;
use crate::error::CliError;

pub async fn run_status(store: &Store, as_json: bool) -> Result<(), CliError> {
    let status = store.sync_status()?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "online": status.online,
                "syncing": status.syncing,
                "pending_count": status.pending_count,
                "error_count": status.error_count,
                "last_sync_at": status.last_sync_at,
                "last_successful_sync": status.last_successful_sync,
            }))?
        );
        return Ok(());
    }

    println!("Pending mutations: {}", status.pending_count);
    if status.error_count > 0 {
        println!("Failed expenses:   {}", status.error_count);
    }
    println!("Last sync attempt: {}", format_time(status.last_sync_at));
    println!(
        "Last full sync:    {}",
        format_time(status.last_successful_sync)
    );
    Ok(())
}

fn format_time(timestamp_ms: Option<i64>) -> String {
    timestamp_ms
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(
            || "never".to_string(),
            |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}
