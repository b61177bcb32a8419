//! Dispatch alert model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{RecordId, Severity, Vitals};

/// Facility identifier; also the name of its broadcast room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Hub-assigned alert identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    /// Generate a fresh `ALR-` prefixed identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("ALR-{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlertId {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl From<String> for AlertId {
    fn from(value: String) -> Self {
        Self(value.trim().to_string())
    }
}

/// A dispatch-originated notification of an inbound patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_id: AlertId,
    /// The single room this alert belongs to
    pub room_id: RoomId,
    pub severity: Severity,
    pub message: String,
    /// Expected arrival (Unix ms)
    #[serde(default)]
    pub estimated_arrival: Option<i64>,
    #[serde(default)]
    pub acknowledged: bool,
    /// Viewer session or unit that acknowledged first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    /// When the first acknowledgment happened (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<i64>,
    /// Field record the alert was raised from
    #[serde(default)]
    pub record_id: Option<RecordId>,
    #[serde(default)]
    pub chief_complaint: String,
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default)]
    pub department: Option<String>,
    /// Creation time at the hub (Unix ms)
    #[serde(default)]
    pub created_at: i64,
}

/// Who handled an alert and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub by: Option<String>,
    /// Unix ms
    pub at: i64,
}

impl Acknowledgment {
    pub fn now(by: Option<String>) -> Self {
        Self {
            by,
            at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl Alert {
    /// Merge mutable fields from a newer copy of the same alert.
    ///
    /// `acknowledged` only ever moves from false to true, and the first
    /// acknowledgment's author and time are kept.
    pub fn absorb(&mut self, newer: Self) {
        let previous = std::mem::replace(self, newer);
        if previous.acknowledged {
            self.acknowledged = true;
            self.acknowledged_by = previous.acknowledged_by;
            self.acknowledged_at = previous.acknowledged_at;
        }
    }

    /// Mark handled; returns whether this call changed the flag.
    pub fn acknowledge(&mut self, acknowledgment: Acknowledgment) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_by = acknowledgment.by;
        self.acknowledged_at = Some(acknowledgment.at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(id: &str) -> Alert {
        Alert {
            alert_id: AlertId::from(id),
            room_id: RoomId::from("7"),
            severity: Severity::Esi3,
            message: "Incoming patient".to_string(),
            estimated_arrival: None,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            record_id: None,
            chief_complaint: "fall".to_string(),
            vitals: Vitals::default(),
            department: None,
            created_at: 1,
        }
    }

    fn ack(by: &str, at: i64) -> Acknowledgment {
        Acknowledgment {
            by: Some(by.to_string()),
            at,
        }
    }

    #[test]
    fn acknowledge_transitions_once() {
        let mut alert = alert("A1");
        assert!(alert.acknowledge(ack("unit-12", 100)));
        assert!(!alert.acknowledge(ack("unit-40", 200)));
        assert!(alert.acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("unit-12"));
        assert_eq!(alert.acknowledged_at, Some(100));
    }

    #[test]
    fn absorb_preserves_acknowledgment() {
        let mut current = alert("A1");
        current.acknowledge(ack("unit-12", 100));
        let mut newer = alert("A1");
        newer.message = "Updated".to_string();
        newer.acknowledged = true;
        newer.acknowledged_by = Some("hub".to_string());
        newer.acknowledged_at = Some(300);
        current.absorb(newer);
        assert!(current.acknowledged);
        assert_eq!(current.message, "Updated");
        assert_eq!(current.acknowledged_by.as_deref(), Some("unit-12"));
        assert_eq!(current.acknowledged_at, Some(100));
    }

    #[test]
    fn unacknowledged_alert_omits_ack_fields_on_the_wire() {
        let value = serde_json::to_value(alert("A1")).unwrap();
        assert!(value.get("acknowledgedAt").is_none());

        let mut handled = alert("A1");
        handled.acknowledge(ack("unit-12", 100));
        let value = serde_json::to_value(handled).unwrap();
        assert_eq!(value["acknowledgedBy"], "unit-12");
        assert_eq!(value["acknowledgedAt"], 100);
    }

    #[test]
    fn generated_alert_ids_are_prefixed_and_unique() {
        let a = AlertId::generate();
        let b = AlertId::generate();
        assert!(a.as_str().starts_with("ALR-"));
        assert_ne!(a, b);
    }

    #[test]
    fn room_id_trims_input() {
        assert_eq!(RoomId::from(" 7 ").as_str(), "7");
        assert!(RoomId::from("  ").is_empty());
    }
}
