//! Operator CLI for the table store.
//!
//! Configuration comes from `--config <file>` (TOML) or, without it, from
//! defaults plus `TABLESTORE_*` environment variables.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tablestore::activity_log::{ActivityEvent, ActivityLog};
use tablestore::observability::{init_tracing, LogFormat};
use tablestore::{open_store, StoreConfig, SystemClock, TableStore};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "tablestore", version, about = "Inspect and append to stored tables")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format: plain or json
    #[arg(long, default_value = "plain")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a table's rows as JSON lines
    Read { path: String },
    /// List a folder's entries
    List { folder: String },
    /// Append an event to the activity log
    Log { actor: String, action: String },
    /// List temp objects orphaned beside a table by failed moves
    Orphans { path: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::from_env()?,
    };
    let store = open_store(&config).await?;
    let tables = Arc::new(TableStore::from_config(store, &config));

    match cli.command {
        Command::Read { path } => {
            let table = tables.read_table(&path).await?;
            for record in table.records() {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        Command::List { folder } => {
            for name in tables.store().list_folder(&folder).await? {
                println!("{}", name);
            }
        }
        Command::Log { actor, action } => {
            let log = ActivityLog::new(Arc::clone(&tables), config.paths.activity_log.clone());
            let event = ActivityEvent::now(&SystemClock, actor, action);
            if !log.append(&event).await? {
                error!(path = %log.path(), "activity log write failed");
                return Err("activity log write failed".into());
            }
            println!("{} {} {}", event.timestamp, event.actor, event.action);
        }
        Command::Orphans { path } => {
            for temp in tables.orphaned_temps(&path).await? {
                println!("{}", temp);
            }
        }
    }
    Ok(())
}
