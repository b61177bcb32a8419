//! Channel session state machine.
//!
//! [`ChannelSession`] never touches a socket. Each transition returns the
//! [`SessionCommand`]s the caller must carry out; the async
//! [`SessionDriver`](super::SessionDriver) does that against a real
//! transport.
//!
//! ```text
//! disconnected ─join─► connecting ─snapshot─► joined
//!                          │                    │ drop
//!                          └──drop/timeout──► reconnecting ─snapshot─► joined
//!                                               │ attempts exhausted
//!                                               ▼
//!                                         disconnected
//! ```
//!
//! Every join, leave and drop bumps an epoch. Completions carrying an older
//! epoch belong to a transport or room the session has moved on from and are
//! ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::protocol::{ClientMessage, EventKind, HubMessage};
use crate::ledger::AlertLedger;
use crate::models::{Acknowledgment, AlertId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Joined,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Joined => "joined",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Transport-level failures, surfaced as state transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel dropped: {0}")]
    Dropped(String),
    #[error("Gave up on room {room_id} after {attempts} reconnect attempts")]
    Exhausted { room_id: RoomId, attempts: u32 },
    #[error("Channel join timed out")]
    Timeout,
    #[error("Channel protocol error: {0}")]
    Protocol(String),
}

/// Rejected session requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Already joined to room {0}; leave it first")]
    AlreadyJoined(RoomId),
    #[error("Room id must not be empty")]
    EmptyRoom,
    #[error("Channel session has stopped")]
    Stopped,
}

/// Reconnect backoff. Delay for attempt `n` (0-based) is `first × factor^n`,
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            first: Duration::from_millis(500),
            max: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Open a transport and report back with this epoch
    Connect { epoch: u64 },
    Send(ClientMessage),
    /// Drop the current transport and any pending timers
    Close,
    /// Call [`ChannelSession::retry`] after `delay`
    ScheduleRetry { epoch: u64, delay: Duration },
    /// Call [`ChannelSession::on_join_timeout`] if no snapshot arrives in time
    ArmJoinTimeout { epoch: u64 },
    /// Unrecoverable; show it to the operator
    Fatal(ChannelError),
}

pub type EventHandler = Arc<dyn Fn(&HubMessage) + Send + Sync>;

pub struct ChannelSession {
    session_id: String,
    state: ConnectionState,
    room: Option<RoomId>,
    epoch: u64,
    /// Consecutive failed attempts since the last successful join
    attempts: u32,
    policy: ReconnectPolicy,
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("room", &self.room)
            .field("epoch", &self.epoch)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl ChannelSession {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            session_id: Uuid::now_v7().to_string(),
            state: ConnectionState::Disconnected,
            room: None,
            epoch: 0,
            attempts: 0,
            policy,
            handlers: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub const fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    pub const fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.room.is_some()
    }

    /// Register a callback for one event kind, run after the ledger is updated.
    pub fn on_event<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&HubMessage) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    fn advance_epoch(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }

    pub fn join(&mut self, room: RoomId) -> Result<Vec<SessionCommand>, SessionError> {
        if room.is_empty() {
            return Err(SessionError::EmptyRoom);
        }
        if let Some(current) = self.room.as_ref() {
            return Err(SessionError::AlreadyJoined(current.clone()));
        }

        tracing::info!(session_id = %self.session_id, room_id = %room, "Joining room");
        self.room = Some(room);
        self.attempts = 0;
        self.state = ConnectionState::Connecting;
        let epoch = self.advance_epoch();
        Ok(vec![SessionCommand::Connect { epoch }])
    }

    /// Stop delivery immediately. Events for the old room are dropped from now on.
    pub fn leave(&mut self) -> Vec<SessionCommand> {
        let Some(room) = self.room.take() else {
            return Vec::new();
        };

        tracing::info!(session_id = %self.session_id, room_id = %room, "Leaving room");
        let was_connected = self.state != ConnectionState::Disconnected;
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        self.advance_epoch();

        let mut commands = Vec::with_capacity(2);
        if was_connected {
            commands.push(SessionCommand::Send(ClientMessage::LeaveRoom { room_id: room }));
        }
        commands.push(SessionCommand::Close);
        commands
    }

    /// Transport for `epoch` is open: ask for the room and its snapshot.
    pub fn on_connected(&mut self, epoch: u64) -> Vec<SessionCommand> {
        if !self.is_current(epoch)
            || !matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            )
        {
            tracing::debug!(epoch, current = self.epoch, "Ignoring stale connection");
            return Vec::new();
        }
        let Some(room) = self.room.clone() else {
            return Vec::new();
        };

        vec![
            SessionCommand::Send(ClientMessage::JoinRoom { room_id: room }),
            SessionCommand::ArmJoinTimeout { epoch },
        ]
    }

    /// Apply one inbound event.
    pub fn on_message(&mut self, message: HubMessage, ledger: &mut AlertLedger) {
        let Some(room) = self.room.as_ref() else {
            tracing::debug!(room_id = %message.room_id(), "Dropping event; no room joined");
            return;
        };
        if message.room_id() != room {
            tracing::debug!(
                room_id = %message.room_id(),
                joined = %room,
                "Dropping event for another room"
            );
            return;
        }

        match &message {
            HubMessage::Snapshot { alerts, .. } => {
                ledger.reconcile(alerts.clone());
                if self.state != ConnectionState::Joined {
                    tracing::info!(
                        session_id = %self.session_id,
                        room_id = %room,
                        alerts = alerts.len(),
                        "Joined room"
                    );
                }
                self.state = ConnectionState::Joined;
                self.attempts = 0;
            }
            HubMessage::NewAlert { alert } => {
                ledger.upsert(alert.clone());
            }
            HubMessage::VitalsUpdate {
                alert_id, vitals, ..
            } => {
                ledger.apply_vitals(alert_id, vitals);
            }
            HubMessage::AlertAcknowledged {
                alert_id,
                acknowledged_by,
                acknowledged_at,
                ..
            } => {
                let acknowledgment = match acknowledged_at {
                    Some(at) => Acknowledgment {
                        by: acknowledged_by.clone(),
                        at: *at,
                    },
                    None => Acknowledgment::now(acknowledged_by.clone()),
                };
                ledger.acknowledge(alert_id, acknowledgment);
            }
        }

        if let Some(handlers) = message.kind().and_then(|kind| self.handlers.get(&kind)) {
            for handler in handlers {
                handler(&message);
            }
        }
    }

    /// Acknowledge locally and tell the hub.
    pub fn acknowledge(
        &mut self,
        alert_id: AlertId,
        ledger: &mut AlertLedger,
    ) -> Vec<SessionCommand> {
        ledger.acknowledge(&alert_id, Acknowledgment::now(Some(self.session_id.clone())));
        if self.state == ConnectionState::Joined {
            vec![SessionCommand::Send(ClientMessage::Acknowledge {
                alert_id,
                acknowledged_by: Some(self.session_id.clone()),
            })]
        } else {
            tracing::warn!(alert_id = %alert_id, "Acknowledged while not joined; hub not notified");
            Vec::new()
        }
    }

    /// The transport for `epoch` failed, closed or never opened.
    pub fn on_dropped(&mut self, epoch: u64, reason: &ChannelError) -> Vec<SessionCommand> {
        if !self.is_current(epoch) || self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        let Some(room) = self.room.clone() else {
            return Vec::new();
        };

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.policy.max_attempts {
            let attempts = self.policy.max_attempts;
            tracing::error!(room_id = %room, attempts, error = %reason, "Reconnect attempts exhausted");
            self.room = None;
            self.state = ConnectionState::Disconnected;
            self.attempts = 0;
            self.advance_epoch();
            return vec![
                SessionCommand::Close,
                SessionCommand::Fatal(ChannelError::Exhausted {
                    room_id: room,
                    attempts,
                }),
            ];
        }

        let delay = self.policy.delay(self.attempts - 1);
        tracing::warn!(
            room_id = %room,
            attempt = self.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %reason,
            "Channel dropped; reconnecting"
        );
        self.state = ConnectionState::Reconnecting;
        let epoch = self.advance_epoch();
        vec![
            SessionCommand::Close,
            SessionCommand::ScheduleRetry { epoch, delay },
        ]
    }

    pub fn on_join_timeout(&mut self, epoch: u64) -> Vec<SessionCommand> {
        if self.state == ConnectionState::Joined {
            return Vec::new();
        }
        self.on_dropped(epoch, &ChannelError::Timeout)
    }

    /// Backoff elapsed; reconnect and re-issue the join for the same room.
    pub fn retry(&mut self, epoch: u64) -> Vec<SessionCommand> {
        if !self.is_current(epoch) || self.state != ConnectionState::Reconnecting {
            return Vec::new();
        }
        vec![SessionCommand::Connect { epoch }]
    }
}
