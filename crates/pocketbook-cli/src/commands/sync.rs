use pocketbook_core::sync::SyncStats;

use crate::commands::common::Store;
use crate::error::CliError;

pub async fn run_sync(store: &Store) -> Result<(), CliError> {
    let stats = store.sync_now().await?;
    print_stats(&stats);
    Ok(())
}

pub async fn run_retry(store: &Store) -> Result<(), CliError> {
    let stats = store.retry_failed_syncs().await?;
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &SyncStats) {
    if stats.skipped {
        println!("Sync skipped (offline or already running).");
        return;
    }

    let pushed = stats.acked + stats.replayed;
    match (pushed, stats.remaining) {
        (0, 0) => println!("Nothing to sync."),
        (n, 0) => println!("Synced {n} mutation(s). All caught up."),
        (n, remaining) => println!("Synced {n} mutation(s), {remaining} still queued."),
    }
    if stats.conflicts > 0 {
        println!("Resolved {} conflict(s).", stats.conflicts);
    }
    if stats.rescheduled > 0 {
        println!(
            "{} mutation(s) hit transient errors and will be retried.",
            stats.rescheduled
        );
    }
    if stats.rejected > 0 {
        println!(
            "{} mutation(s) were rejected by the server. Run `pocketbook retry` after fixing them.",
            stats.rejected
        );
    }
}
