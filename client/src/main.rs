//! tally-sync - diagnostic command line for the sync client.
//!
//! Lists budget files, dumps a file's full history, or runs one sync cycle
//! against the local database.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_client::{
    Config, Database, HttpTransport, Scope, Session, SyncClient, SyncOptions, SyncOutcome,
};
use tally_engine::{HybridLogicalClock, SchemaRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tally-sync", version, about = "Sync client diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List budget files on the server
    Files,
    /// Pull a file's full history and count messages per dataset
    History {
        #[arg(long)]
        file_id: String,
        #[arg(long)]
        group_id: String,
    },
    /// Run one sync cycle against the local database
    Sync {
        #[arg(long)]
        file_id: String,
        #[arg(long)]
        group_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let db = Database::connect(&config.database_url, SchemaRegistry::finance()).await?;
    let client_id = db.client_id(config.client_id.as_deref()).await?;
    let clock = Arc::new(HybridLogicalClock::new(client_id.clone())?.with_max_drift(config.max_drift_ms));
    db.seed_clock(&clock).await?;
    tracing::info!("Client {} using {}", client_id, config.server_url);

    let options = SyncOptions::from_config(&config);
    let transport = Arc::new(HttpTransport::new(&config.server_url, options.timeout)?);
    let session = Session::new(config.credentials.clone());
    let client = SyncClient::new(db, transport, session, clock, options);

    match cli.command {
        Command::Files => {
            for file in client.list_user_files().await? {
                println!(
                    "{}\t{}\t{}{}",
                    file.file_id,
                    file.group_id.as_deref().unwrap_or("-"),
                    file.name,
                    if file.deleted { "\t(deleted)" } else { "" }
                );
            }
        }
        Command::History { file_id, group_id } => {
            let messages = client.pull_history(&Scope::new(file_id, group_id)).await?;
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for message in &messages {
                *counts.entry(message.dataset.clone()).or_default() += 1;
            }
            for (dataset, count) in &counts {
                println!("{dataset}\t{count}");
            }
            println!("total\t{}", messages.len());
        }
        Command::Sync { file_id, group_id } => {
            match client.sync(&Scope::new(file_id, group_id)).await? {
                SyncOutcome::Completed(report) => println!(
                    "pushed {}, received {}, applied {}, discarded {}, cursor {}",
                    report.pushed, report.received, report.applied, report.discarded, report.cursor
                ),
                SyncOutcome::Coalesced => println!("sync already in progress"),
            }
        }
    }

    Ok(())
}
