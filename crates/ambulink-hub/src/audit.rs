//! Bounded in-memory trail of alert mutations.
//!
//! Every entry is also emitted as a `tracing` event on the
//! `ambulink_hub::audit` target so deployments can ship it to durable storage.

use std::collections::VecDeque;
use std::sync::Arc;

use ambulink_core::{AlertId, RoomId};
use serde::Serialize;
use tokio::sync::Mutex;

/// Entries kept before the oldest are evicted.
pub const AUDIT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RecordIntake,
    VitalsUpdate,
    Acknowledge,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::RecordIntake => "record_intake",
            Self::VitalsUpdate => "vitals_update",
            Self::Acknowledge => "acknowledge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unix ms
    pub at: i64,
    pub action: AuditAction,
    pub alert_id: AlertId,
    pub room_id: RoomId,
    /// Ambulance unit or viewer session, when the caller named one
    pub actor: Option<String>,
    pub detail: String,
}

#[derive(Clone)]
pub struct AuditLog {
    entries: Arc<Mutex<VecDeque<AuditEntry>>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "ambulink_hub::audit",
            action = entry.action.label(),
            alert_id = %entry.alert_id,
            room_id = %entry.room_id,
            actor = entry.actor.as_deref().unwrap_or("-"),
            detail = %entry.detail,
            "Audit"
        );

        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Up to `limit` entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(AUDIT_CAPACITY)
    }
}
