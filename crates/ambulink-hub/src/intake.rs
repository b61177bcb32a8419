use std::time::Duration;

use ambulink_core::models::RecordSubmission;
use ambulink_core::triage::classify;
use ambulink_core::util::snippet;
use ambulink_core::{Alert, AlertId, RecordPayload};

use crate::error::AppError;

/// Triage a submitted record and build the alert announcing it.
pub fn build_alert(
    submission: &RecordSubmission,
    default_eta: Duration,
    now_ms: i64,
) -> Result<Alert, AppError> {
    let payload = &submission.payload;
    if payload.room_id.is_empty() {
        return Err(AppError::unprocessable("payload.roomId must not be empty"));
    }

    let default_eta_ms = i64::try_from(default_eta.as_millis()).unwrap_or(i64::MAX);
    let estimated_arrival = payload
        .estimated_arrival
        .unwrap_or_else(|| now_ms.saturating_add(default_eta_ms));

    Ok(Alert {
        alert_id: AlertId::generate(),
        room_id: payload.room_id.clone(),
        severity: classify(&payload.vitals, &payload.chief_complaint),
        message: alert_message(payload),
        estimated_arrival: Some(estimated_arrival),
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
        record_id: Some(submission.record_id),
        chief_complaint: payload.chief_complaint.clone(),
        vitals: payload.vitals.clone(),
        department: payload.department.clone(),
        created_at: now_ms,
    })
}

fn alert_message(payload: &RecordPayload) -> String {
    let name = payload.patient_name().unwrap_or("Unknown");
    let complaint = snippet(&payload.chief_complaint);
    let complaint = if complaint.is_empty() {
        "unspecified complaint".to_string()
    } else {
        complaint
    };
    format!("Incoming patient: {name} - {complaint}")
}
