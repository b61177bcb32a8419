//! Dispatch channel wire format.
//!
//! Every frame is a JSON text message `{"event": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::models::{Alert, AlertId, RoomId, Severity, Vitals};

/// Viewer to hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    Acknowledge {
        alert_id: AlertId,
        /// Acknowledging session or unit
        #[serde(default, skip_serializing_if = "Option::is_none")]
        acknowledged_by: Option<String>,
    },
}

/// Hub to viewer. Each event names its room so stale ones can be dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum HubMessage {
    NewAlert { alert: Alert },
    #[serde(rename_all = "camelCase")]
    VitalsUpdate {
        room_id: RoomId,
        alert_id: AlertId,
        vitals: Vitals,
        severity: Severity,
    },
    #[serde(rename_all = "camelCase")]
    AlertAcknowledged {
        room_id: RoomId,
        alert_id: AlertId,
        #[serde(default)]
        acknowledged_by: Option<String>,
        /// Unix ms; absent from older hubs
        #[serde(default)]
        acknowledged_at: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Snapshot { room_id: RoomId, alerts: Vec<Alert> },
}

impl HubMessage {
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::NewAlert { alert } => &alert.room_id,
            Self::VitalsUpdate { room_id, .. }
            | Self::AlertAcknowledged { room_id, .. }
            | Self::Snapshot { room_id, .. } => room_id,
        }
    }

    /// Handler category, `None` for snapshots.
    pub const fn kind(&self) -> Option<EventKind> {
        match self {
            Self::NewAlert { .. } => Some(EventKind::NewAlert),
            Self::VitalsUpdate { .. } => Some(EventKind::VitalsUpdate),
            Self::AlertAcknowledged { .. } => Some(EventKind::AlertAcknowledged),
            Self::Snapshot { .. } => None,
        }
    }
}

/// Event categories a UI can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewAlert,
    VitalsUpdate,
    AlertAcknowledged,
}
