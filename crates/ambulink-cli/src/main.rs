//! AmbuLink CLI - field capture, outbox sync and facility alert watch
//!
//! Records are queued locally first and reach the hub whenever it is
//! reachable; `watch` follows one facility room in real time.

mod cli;
mod commands;
mod error;
mod transport;


use ambulink_core::config::ClientConfig;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::capture::run_capture;
use crate::commands::classify::run_classify;
use crate::commands::common::resolve_db_path;
use crate::commands::pending::run_pending;
use crate::commands::sync::{run_daemon, run_purge_settled, run_requeue, run_sync};
use crate::commands::watch::run_watch;
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
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ambulink=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Capture(args) => {
            let config = ClientConfig::from_env()?;
            run_capture(&args, config.device_id.as_deref(), &db_path).await?;
        }
        Commands::Pending { json } => run_pending(json, &db_path).await?,
        Commands::Sync => run_sync(&ClientConfig::from_env()?, &db_path).await?,
        Commands::Requeue { record_id } => run_requeue(&record_id, &db_path).await?,
        Commands::PurgeSettled => run_purge_settled(&db_path).await?,
        Commands::Daemon => run_daemon(&ClientConfig::from_env()?, &db_path).await?,
        Commands::Watch { room } => run_watch(&room, &ClientConfig::from_env()?).await?,
        Commands::Classify {
            complaint,
            vitals,
            json,
        } => run_classify(&complaint, &vitals, json)?,
    }

    Ok(())
}
