use std::path::Path;

use ambulink_core::triage::classify;
use ambulink_core::RecordPayload;
use serde_json::json;

use crate::cli::CaptureArgs;
use crate::commands::common::{normalize_complaint, open_store};
use crate::error::CliError;

pub async fn run_capture(
    args: &CaptureArgs,
    device_id: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let payload = build_payload(args, device_id, chrono::Utc::now().timestamp_millis())?;
    let severity = classify(&payload.vitals, &payload.chief_complaint);
    let room_id = payload.room_id.clone();

    let store = open_store(db_path).await?;
    let record_id = store.append(payload).await?;
    tracing::info!(%record_id, %room_id, "Captured field record");
    println!("Queued record {record_id} for room {room_id} (local triage {severity})");
    Ok(())
}

pub fn build_payload(
    args: &CaptureArgs,
    device_id: Option<&str>,
    now_ms: i64,
) -> Result<RecordPayload, CliError> {
    let complaint = normalize_complaint(&args.complaint)?;
    let mut payload = RecordPayload::new(args.room.as_str(), complaint);
    if payload.room_id.is_empty() {
        return Err(CliError::EmptyRoom);
    }

    payload.ambulance_id = device_id.map(str::to_string);
    if let Some(name) = args.name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
        payload.demographics.insert("name".to_string(), json!(name));
    }
    if let Some(age) = args.age {
        payload.demographics.insert("age".to_string(), json!(age));
    }
    payload.vitals = args.vitals.to_vitals();
    payload.notes = args.notes.clone();
    payload.department = args.department.clone();
    payload.estimated_arrival = args
        .eta
        .map(|minutes| now_ms.saturating_add(i64::from(minutes) * 60_000));
    Ok(payload)
}
