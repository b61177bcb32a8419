//! Field record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{RoomId, Vitals};

/// A unique identifier for a field record, using UUID v7 (time-sortable).
///
/// Assigned once when the record is captured and resent unchanged on every
/// submission attempt, which is what makes submission idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Geographic origin of the pickup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Patient intake content captured on the device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    /// Destination facility room
    pub room_id: RoomId,
    /// Originating ambulance unit
    #[serde(default)]
    pub ambulance_id: Option<String>,
    /// Name, age, sex and similar free-form demographics
    #[serde(default)]
    pub demographics: serde_json::Map<String, serde_json::Value>,
    /// Conditions, medications, allergies
    #[serde(default)]
    pub medical_history: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default)]
    pub chief_complaint: String,
    /// Free-text crew notes
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub origin: Option<Coordinates>,
    /// Receiving department hint (e.g. "cardiology", "trauma")
    #[serde(default)]
    pub department: Option<String>,
    /// Crew-estimated arrival (Unix ms)
    #[serde(default)]
    pub estimated_arrival: Option<i64>,
}

impl RecordPayload {
    /// Create a payload addressed to a facility room.
    #[must_use]
    pub fn new(room_id: impl Into<RoomId>, chief_complaint: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            chief_complaint: chief_complaint.into(),
            ..Self::default()
        }
    }

    /// Patient display name from demographics, if captured.
    pub fn patient_name(&self) -> Option<&str> {
        self.demographics
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// One patient-intake snapshot waiting in (or drained from) the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Idempotency key, stable across retries
    pub record_id: RecordId,
    pub payload: RecordPayload,
    /// Device-local capture timestamp (Unix ms), immutable
    pub captured_at: i64,
    /// True once the facility endpoint accepted the record
    pub settled: bool,
    /// Submission attempts so far
    pub attempts: u32,
    /// Permanently rejected by the endpoint; excluded from automatic drains
    pub held: bool,
    /// Last failure reported for this record
    pub last_error: Option<String>,
}

impl FieldRecord {
    /// Create a new pending record for the given payload
    #[must_use]
    pub fn new(payload: RecordPayload) -> Self {
        Self {
            record_id: RecordId::new(),
            payload,
            captured_at: chrono::Utc::now().timestamp_millis(),
            settled: false,
            attempts: 0,
            held: false,
            last_error: None,
        }
    }

    /// A record is pending until it settles; held records are still pending.
    pub const fn is_pending(&self) -> bool {
        !self.settled
    }

    /// Wire body for the submission endpoint.
    pub fn submission(&self) -> RecordSubmission {
        RecordSubmission {
            record_id: self.record_id,
            payload: self.payload.clone(),
            captured_at: self.captured_at,
        }
    }
}

/// Body of `POST /v1/records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSubmission {
    pub record_id: RecordId,
    pub payload: RecordPayload,
    pub captured_at: i64,
}
