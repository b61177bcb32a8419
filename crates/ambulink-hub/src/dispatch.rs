//! Room registry and per-room broadcast.
//!
//! Each facility room owns a broadcast sender and the hub's copy of its alert
//! ledger. Subscribing and taking the snapshot happen under the same lock, so
//! a joining viewer sees every alert exactly once: in the snapshot or as a
//! later event.

use std::collections::{HashMap, VecDeque};

use ambulink_core::channel::HubMessage;
use ambulink_core::ledger::{AlertLedger, LedgerRetention};
use ambulink_core::models::Acknowledgment;
use ambulink_core::{Alert, AlertId, RecordId, RoomId, Vitals};
use tokio::sync::{broadcast, Mutex};

/// Most alerts returned by a listing. Join snapshots carry every open alert
/// and fill up to this many with recently acknowledged ones.
pub const ROOM_LISTING_LIMIT: usize = 100;

/// Record ids remembered for duplicate detection. A record resubmitted after
/// its id was evicted raises a fresh alert.
pub const RECORD_MEMORY: usize = 10_000;

/// Acknowledged alerts the hub keeps per room for snapshots.
const HUB_RETENTION: LedgerRetention = LedgerRetention {
    max_acknowledged: 200,
};

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Created(Alert),
    /// The record was seen before; carries the alert raised the first time
    AlreadyExisted(AlertId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AckOutcome {
    /// False when the alert was already acknowledged
    pub changed: bool,
    pub alert: Alert,
}

pub struct DispatchRouter {
    state: Mutex<RouterState>,
    capacity: usize,
    record_memory: usize,
}

#[derive(Default)]
struct RouterState {
    rooms: HashMap<RoomId, Room>,
    alert_rooms: HashMap<AlertId, RoomId>,
    /// Idempotency memory for intake, bounded by `record_order`
    record_alerts: HashMap<RecordId, AlertId>,
    record_order: VecDeque<RecordId>,
}

struct Room {
    sender: broadcast::Sender<HubMessage>,
    ledger: AlertLedger,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            ledger: AlertLedger::new(HUB_RETENTION),
        }
    }

    fn publish(&self, message: HubMessage) {
        // No viewers in the room is not an error
        let _ = self.sender.send(message);
    }

    /// Newest first. Open alerts are never cut; acknowledged ones fill the
    /// remaining room under the listing limit.
    fn snapshot(&self) -> Vec<Alert> {
        let mut acknowledged_room =
            ROOM_LISTING_LIMIT.saturating_sub(self.ledger.unacknowledged_count());
        self.ledger
            .iter()
            .filter(|alert| {
                if !alert.acknowledged {
                    return true;
                }
                if acknowledged_room == 0 {
                    return false;
                }
                acknowledged_room -= 1;
                true
            })
            .cloned()
            .collect()
    }
}

impl RouterState {
    fn room_mut(&mut self, room_id: &RoomId, capacity: usize) -> &mut Room {
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(capacity))
    }

    /// Room and ledger entry for an alert, dropping index entries the ledger
    /// already pruned.
    fn locate(&mut self, alert_id: &AlertId) -> Option<RoomId> {
        let room_id = self.alert_rooms.get(alert_id)?.clone();
        let present = self
            .rooms
            .get(&room_id)
            .is_some_and(|room| room.ledger.get(alert_id).is_some());
        if present {
            Some(room_id)
        } else {
            self.alert_rooms.remove(alert_id);
            None
        }
    }

    fn remember_record(&mut self, record_id: RecordId, alert_id: AlertId, limit: usize) {
        self.record_alerts.insert(record_id, alert_id);
        self.record_order.push_back(record_id);
        while self.record_order.len() > limit {
            if let Some(oldest) = self.record_order.pop_front() {
                self.record_alerts.remove(&oldest);
            }
        }
    }
}

impl DispatchRouter {
    pub fn new(capacity: usize) -> Self {
        Self::with_record_memory(capacity, RECORD_MEMORY)
    }

    pub fn with_record_memory(capacity: usize, record_memory: usize) -> Self {
        Self {
            state: Mutex::new(RouterState::default()),
            capacity,
            record_memory: record_memory.max(1),
        }
    }

    /// Register a freshly built alert for its record, or report the alert the
    /// record already produced.
    pub async fn intake(&self, record_id: RecordId, alert: Alert) -> IntakeOutcome {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.record_alerts.get(&record_id) {
            return IntakeOutcome::AlreadyExisted(existing.clone());
        }

        state.remember_record(record_id, alert.alert_id.clone(), self.record_memory);
        state
            .alert_rooms
            .insert(alert.alert_id.clone(), alert.room_id.clone());

        let room = state.room_mut(&alert.room_id, self.capacity);
        room.ledger.upsert(alert.clone());
        room.publish(HubMessage::NewAlert {
            alert: alert.clone(),
        });
        tracing::info!(
            alert_id = %alert.alert_id,
            room_id = %alert.room_id,
            severity = %alert.severity,
            "Raised alert"
        );
        IntakeOutcome::Created(alert)
    }

    /// Merge a vitals refresh into an alert and broadcast it.
    pub async fn update_vitals(&self, alert_id: &AlertId, vitals: &Vitals) -> Option<Alert> {
        let mut state = self.state.lock().await;
        let room_id = state.locate(alert_id)?;
        let room = state.rooms.get_mut(&room_id)?;
        if !room.ledger.apply_vitals(alert_id, vitals) {
            return None;
        }
        let alert = room.ledger.get(alert_id)?.clone();
        room.publish(HubMessage::VitalsUpdate {
            room_id,
            alert_id: alert.alert_id.clone(),
            vitals: alert.vitals.clone(),
            severity: alert.severity,
        });
        Some(alert)
    }

    /// Acknowledge an alert.
    ///
    /// `None` for unknown ids. Only the first acknowledgment is stamped and
    /// broadcast; later calls return the alert with the original stamp.
    pub async fn acknowledge(
        &self,
        alert_id: &AlertId,
        acknowledged_by: Option<String>,
    ) -> Option<AckOutcome> {
        let mut state = self.state.lock().await;
        let room_id = state.locate(alert_id)?;
        let room = state.rooms.get_mut(&room_id)?;
        let changed = room
            .ledger
            .acknowledge(alert_id, Acknowledgment::now(acknowledged_by));
        let alert = room.ledger.get(alert_id)?.clone();
        if changed {
            room.publish(HubMessage::AlertAcknowledged {
                room_id,
                alert_id: alert_id.clone(),
                acknowledged_by: alert.acknowledged_by.clone(),
                acknowledged_at: alert.acknowledged_at,
            });
        }
        Some(AckOutcome { changed, alert })
    }

    /// Unacknowledged alerts in a room, newest first.
    pub async fn room_alerts(&self, room_id: &RoomId) -> Vec<Alert> {
        let state = self.state.lock().await;
        state
            .rooms
            .get(room_id)
            .map(|room| {
                room.ledger
                    .iter()
                    .filter(|alert| !alert.acknowledged)
                    .take(ROOM_LISTING_LIMIT)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Join a room: the current snapshot plus a receiver for later events.
    pub async fn subscribe(&self, room_id: &RoomId) -> (Vec<Alert>, broadcast::Receiver<HubMessage>) {
        let mut state = self.state.lock().await;
        let room = state.room_mut(room_id, self.capacity);
        (room.snapshot(), room.sender.subscribe())
    }

    /// Current snapshot without subscribing; used to resync lagging viewers.
    pub async fn snapshot(&self, room_id: &RoomId) -> Vec<Alert> {
        let state = self.state.lock().await;
        state
            .rooms
            .get(room_id)
            .map(Room::snapshot)
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }
}
