use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ambulink_core::config::ClientConfig;
use ambulink_core::connectivity::ConnectivityMonitor;
use ambulink_core::outbox::{
    HttpRecordSubmitter, OutboxEngine, OutboxSettings, SyncOutcome, SyncStatus,
};
use ambulink_core::services::RecordStoreService;
use ambulink_core::{Alert, FieldRecord, RecordId};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub record_id: String,
    pub room_id: String,
    pub chief_complaint: String,
    pub captured_at: i64,
    pub relative_time: String,
    pub attempts: u32,
    pub held: bool,
    pub last_error: Option<String>,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("AMBULINK_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ambulink")
        .join("outbox.db")
}

pub async fn open_store(path: &Path) -> Result<RecordStoreService, CliError> {
    Ok(RecordStoreService::open_path(path.to_path_buf()).await?)
}

pub fn build_engine(
    store: RecordStoreService,
    config: &ClientConfig,
    connectivity: ConnectivityMonitor,
) -> Result<OutboxEngine, CliError> {
    let hub_url = config.require_hub_url()?;
    let submitter =
        HttpRecordSubmitter::new(hub_url, config.api_token.clone(), config.submit_timeout)?;
    tracing::debug!(endpoint = submitter.endpoint(), "Outbox submitter ready");
    Ok(OutboxEngine::new(
        store,
        Arc::new(submitter),
        connectivity,
        OutboxSettings::from(config),
    ))
}

pub fn normalize_complaint(parts: &[String]) -> Result<String, CliError> {
    let complaint = parts.join(" ");
    let complaint = complaint.trim();
    if complaint.is_empty() {
        Err(CliError::EmptyComplaint)
    } else {
        Ok(complaint.to_string())
    }
}

pub fn parse_record_id(raw: &str) -> Result<RecordId, CliError> {
    let trimmed = raw.trim();
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidRecordId(trimmed.to_string()))
}

pub fn print_sync_status(status: &SyncStatus) {
    let label = match status.outcome {
        SyncOutcome::Synced => "synced",
        SyncOutcome::Failed => "failed",
        SyncOutcome::Retrying => "retrying",
    };
    match &status.message {
        Some(message) => println!(
            "{}  {label:<8}  attempt {}  {message}",
            status.record_id, status.attempts
        ),
        None => println!("{}  {label:<8}  attempt {}", status.record_id, status.attempts),
    }
}

pub fn pending_item(record: &FieldRecord, now_ms: i64) -> PendingItem {
    PendingItem {
        record_id: record.record_id.to_string(),
        room_id: record.payload.room_id.to_string(),
        chief_complaint: record.payload.chief_complaint.clone(),
        captured_at: record.captured_at,
        relative_time: format_relative_time(record.captured_at, now_ms),
        attempts: record.attempts,
        held: record.held,
        last_error: record.last_error.clone(),
    }
}

pub fn format_pending_lines(records: &[FieldRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let marker = if record.held { "held" } else { "queued" };
            let mut line = format!(
                "{}  {:<6}  room={}  {:>8}  attempts={}  {}",
                record.record_id,
                marker,
                record.payload.room_id,
                format_relative_time(record.captured_at, now_ms),
                record.attempts,
                record.payload.chief_complaint
            );
            if let Some(error) = &record.last_error {
                line.push_str(&format!("  ({error})"));
            }
            line
        })
        .collect()
}

pub fn format_alert_line(alert: &Alert) -> String {
    let eta = alert
        .estimated_arrival
        .map_or_else(|| "unknown".to_string(), format_clock_time);
    let ack = if alert.acknowledged { "  [ack]" } else { "" };
    format!(
        "[{}] {}  ETA {eta}  {}{ack}",
        alert.severity, alert.alert_id, alert.message
    )
}

pub fn format_clock_time(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%H:%M UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
