//! Pocketbook CLI - track expenses from the terminal
//!
//! Every command works offline; mutations queue locally and reach the
//! server on the next `pocketbook sync` (or the next command that gets
//! through).

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::add::{run_add, AddArgs};
use crate::commands::common::{open_store, resolve_db_path, resolve_server, resolve_user};
use crate::commands::delete::run_delete;
use crate::commands::list::run_list;
use crate::commands::logout::run_logout;
use crate::commands::status::run_status;
use crate::commands::sync::{run_retry, run_sync};
use crate::commands::update::{run_update, UpdateArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pocketbook=warn")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let server = resolve_server(cli.server);
    let user = resolve_user(cli.user)?;
    let store = open_store(&db_path, &server, &user)?;

    match cli.command {
        Commands::Add {
            amount,
            description,
            category,
            kind,
            payment,
            date,
        } => {
            run_add(
                &store,
                &user,
                AddArgs {
                    amount,
                    description: &description,
                    category: &category,
                    kind: &kind,
                    payment: &payment,
                    date: date.as_deref(),
                },
            )
            .await?;
        }
        Commands::List {
            from,
            to,
            limit,
            json,
        } => run_list(&store, from.as_deref(), to.as_deref(), limit, json).await?,
        Commands::Update {
            id,
            amount,
            description,
            category,
            kind,
            payment,
            date,
        } => {
            run_update(
                &store,
                &id,
                UpdateArgs {
                    amount,
                    description: description.as_deref(),
                    category: category.as_deref(),
                    kind: kind.as_deref(),
                    payment: payment.as_deref(),
                    date: date.as_deref(),
                },
            )
            .await?;
        }
        Commands::Delete { id } => run_delete(&store, &id).await?,
        Commands::Sync => run_sync(&store).await?,
        Commands::Retry => run_retry(&store).await?,
        Commands::Status { json } => run_status(&store, json).await?,
        Commands::Logout { force } => run_logout(&store, force).await?,
    }

    Ok(())
}
