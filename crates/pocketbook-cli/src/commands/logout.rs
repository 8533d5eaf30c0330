use crate::commands::common::Store;
use crate::error::CliError;

pub async fn run_logout(store: &Store, force: bool) -> Result<(), CliError> {
    let pending = store.engine().pending_count()?;
    if pending > 0 && !force {
        return Err(CliError::UnsyncedData(pending));
    }

    store.clear_all()?;
    println!("Local data cleared.");
    Ok(())
}
