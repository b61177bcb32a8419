use std::path::Path;
use std::sync::Arc;

use ambulink_core::config::ClientConfig;
use ambulink_core::connectivity::{
    spawn_probe, ConnectivityMonitor, HttpReachabilityProbe, ReachabilityProbe,
};
use ambulink_core::outbox::{DrainReport, DrainTrigger, SyncOutcome, SyncStatus};

use crate::commands::common::{build_engine, open_store, parse_record_id, print_sync_status};
use crate::error::CliError;

pub async fn run_sync(config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let hub_url = config.require_hub_url()?;
    let store = open_store(db_path).await?;

    let probe = HttpReachabilityProbe::new(hub_url, config.submit_timeout)?;
    let monitor = ConnectivityMonitor::new(probe.probe().await);
    let engine = build_engine(store, config, monitor)?
        .with_status_callback(Arc::new(print_sync_status));

    let status = engine.queue_status().await?;
    if !status.online {
        println!(
            "Hub unreachable; {} record(s) remain queued.",
            status.pending
        );
        return Ok(());
    }
    if status.pending == status.held {
        println!("Nothing to sync ({} held).", status.held);
        return Ok(());
    }

    match engine.drain(DrainTrigger::Manual).await {
        DrainReport::Coalesced => println!("A sync pass is already running."),
        DrainReport::Completed { summary, .. } => {
            println!(
                "Synced {}, failed {}, retrying {}.",
                summary.synced, summary.failed, summary.retrying
            );
            if summary.skipped > 0 {
                eprintln!("Skipped {} unreadable record(s).", summary.skipped);
            }
            if summary.halted {
                println!("Stopped early; remaining records stay queued for the next sync.");
            }
        }
    }
    Ok(())
}

pub async fn run_requeue(record_id: &str, db_path: &Path) -> Result<(), CliError> {
    let record_id = parse_record_id(record_id)?;
    let store = open_store(db_path).await?;
    store.requeue(&record_id).await?;
    println!("Requeued record {record_id}");
    Ok(())
}

pub async fn run_purge_settled(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let removed = store.purge_settled().await?;
    println!("Removed {removed} settled record(s)");
    Ok(())
}

/// Probe the hub, drain on every reconnect and on the timer, until Ctrl-C.
pub async fn run_daemon(config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let hub_url = config.require_hub_url()?;
    let store = open_store(db_path).await?;

    let monitor = ConnectivityMonitor::new(false);
    let probe: Arc<dyn ReachabilityProbe> =
        Arc::new(HttpReachabilityProbe::new(hub_url, config.submit_timeout)?);
    let probe_task = spawn_probe(monitor.clone(), probe, config.probe_interval);
    let watcher = monitor.on_change(|online| {
        if online {
            tracing::info!("Hub reachable");
        } else {
            tracing::warn!("Hub unreachable; records will queue locally");
        }
    });

    let engine = build_engine(store, config, monitor)?
        .with_status_callback(Arc::new(log_sync_status));
    let handle = engine.spawn();
    tracing::info!(
        interval_secs = config.sync_interval.as_secs(),
        "Outbox daemon running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Stopping outbox daemon");
    probe_task.abort();
    watcher.abort();
    handle.shutdown().await;
    Ok(())
}

fn log_sync_status(status: &SyncStatus) {
    let message = status.message.as_deref().unwrap_or("");
    match status.outcome {
        SyncOutcome::Synced => {
            tracing::info!(record_id = %status.record_id, attempts = status.attempts, "Record synced");
        }
        SyncOutcome::Retrying => tracing::warn!(
            record_id = %status.record_id,
            attempts = status.attempts,
            message,
            "Record will be retried"
        ),
        SyncOutcome::Failed => tracing::error!(
            record_id = %status.record_id,
            attempts = status.attempts,
            message,
            "Record rejected; held until requeued"
        ),
    }
}
