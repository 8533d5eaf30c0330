use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pocketbook")]
#[command(about = "Track expenses offline, sync when you can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Server endpoint (or POCKETBOOK_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// User the expenses belong to (or POCKETBOOK_USER)
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record an expense
    #[command(alias = "new")]
    Add {
        /// Amount spent
        amount: f64,
        /// What the money went to
        description: Vec<String>,
        /// Grocery, Breakfast, Lunch, Dinner, Travel, Snacks, Personal, Shared, Extras
        #[arg(short, long, default_value = "Extras")]
        category: String,
        /// personal or shared
        #[arg(long = "type", default_value = "personal")]
        kind: String,
        /// UPI, Cash, Card, Bank
        #[arg(short, long, default_value = "UPI")]
        payment: String,
        /// Date as YYYY-MM-DD (today when omitted)
        #[arg(long)]
        date: Option<String>,
    },
    /// List expenses, newest first
    List {
        /// Start date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        from: Option<String>,
        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        to: Option<String>,
        /// Number of expenses to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing expense
    #[command(alias = "edit")]
    Update {
        /// Expense ID or unique ID prefix
        id: String,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        description: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(short, long)]
        payment: Option<String>,
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete an existing expense
    Delete {
        /// Expense ID or unique ID prefix
        id: String,
    },
    /// Push queued mutations to the server
    Sync,
    /// Re-arm failed mutations, then sync
    Retry,
    /// Show queue health and last sync times
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Wipe all local data
    Logout {
        /// Proceed even with unsynced mutations
        #[arg(long)]
        force: bool,
    },
}
