//! Async driver that runs a [`ChannelSession`] against a real transport.
//!
//! The driver task exclusively owns the session and its [`AlertLedger`]. The
//! UI talks to it through a [`SessionHandle`]: requests go in over an mpsc
//! channel, connection state and the alert list come back through `watch`
//! channels, fatal notices through a broadcast channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::protocol::{ClientMessage, EventKind, HubMessage};
use super::session::{
    ChannelError, ChannelSession, ConnectionState, ReconnectPolicy, SessionCommand, SessionError,
};
use crate::ledger::{AlertLedger, LedgerRetention};
use crate::models::{Alert, AlertId, RoomId};

/// One open transport: frames to send and frames received.
///
/// The link is considered dropped when `inbound` closes.
#[derive(Debug)]
pub struct ChannelLink {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<HubMessage>,
}

/// Opens transports to the dispatch hub.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<ChannelLink, ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    /// Bound on connect plus snapshot
    pub join_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub retention: LedgerRetention,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
            retention: LedgerRetention::default(),
        }
    }
}

impl From<&crate::config::ClientConfig> for SessionSettings {
    fn from(config: &crate::config::ClientConfig) -> Self {
        Self {
            join_timeout: config.join_timeout,
            reconnect: ReconnectPolicy {
                max_attempts: config.reconnect_max_attempts,
                ..ReconnectPolicy::default()
            },
            retention: LedgerRetention::default(),
        }
    }
}

#[derive(Debug)]
enum SessionRequest {
    Join {
        room: RoomId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Leave,
    Acknowledge(AlertId),
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<ChannelLink, ChannelError>> + Send>>;

struct PendingConnect {
    epoch: u64,
    future: ConnectFuture,
}

enum DriverEvent {
    Request(SessionRequest),
    Inbound(Option<HubMessage>),
    Connected(u64, Result<ChannelLink, ChannelError>),
    Retry(u64),
    JoinTimeout(u64),
}

pub struct SessionDriver {
    session: ChannelSession,
    ledger: AlertLedger,
    connector: Arc<dyn ChannelConnector>,
    settings: SessionSettings,
    link: Option<ChannelLink>,
    connecting: Option<PendingConnect>,
    retry_at: Option<(u64, Instant)>,
    join_deadline: Option<(u64, Instant)>,
    state_tx: watch::Sender<ConnectionState>,
    alerts_tx: watch::Sender<Vec<Alert>>,
    notices_tx: broadcast::Sender<ChannelError>,
}

impl SessionDriver {
    pub fn new(connector: Arc<dyn ChannelConnector>, settings: SessionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (alerts_tx, _) = watch::channel(Vec::new());
        let (notices_tx, _) = broadcast::channel(16);
        Self {
            session: ChannelSession::new(settings.reconnect),
            ledger: AlertLedger::new(settings.retention),
            connector,
            settings,
            link: None,
            connecting: None,
            retry_at: None,
            join_deadline: None,
            state_tx,
            alerts_tx,
            notices_tx,
        }
    }

    /// Register an event callback. Runs on the driver task.
    #[must_use]
    pub fn on_event<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&HubMessage) + Send + Sync + 'static,
    {
        self.session.on_event(kind, handler);
        self
    }

    pub fn spawn(self) -> SessionHandle {
        let (requests_tx, requests_rx) = mpsc::channel(32);
        let state = self.state_tx.subscribe();
        let alerts = self.alerts_tx.subscribe();
        let notices = self.notices_tx.clone();
        let task = tokio::spawn(self.run(requests_rx));
        SessionHandle {
            requests: requests_tx,
            state,
            alerts,
            notices,
            task,
        }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        tracing::debug!(session_id = %self.session.session_id(), "Channel driver started");
        loop {
            let event = tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => DriverEvent::Request(request),
                    None => break,
                },
                message = recv_inbound(&mut self.link) => DriverEvent::Inbound(message),
                (epoch, result) = await_connect(&mut self.connecting) => {
                    DriverEvent::Connected(epoch, result)
                }
                epoch = wait_until(self.retry_at) => DriverEvent::Retry(epoch),
                epoch = wait_until(self.join_deadline) => DriverEvent::JoinTimeout(epoch),
            };

            let commands = self.handle(event);
            self.execute(commands).await;
            self.publish();
        }

        let commands = self.session.leave();
        self.execute(commands).await;
        self.publish();
        tracing::debug!(session_id = %self.session.session_id(), "Channel driver stopped");
    }

    fn handle(&mut self, event: DriverEvent) -> Vec<SessionCommand> {
        match event {
            DriverEvent::Request(SessionRequest::Join { room, reply }) => {
                match self.session.join(room) {
                    Ok(commands) => {
                        self.ledger.clear();
                        let _ = reply.send(Ok(()));
                        commands
                    }
                    Err(error) => {
                        let _ = reply.send(Err(error));
                        Vec::new()
                    }
                }
            }
            DriverEvent::Request(SessionRequest::Leave) => self.session.leave(),
            DriverEvent::Request(SessionRequest::Acknowledge(alert_id)) => {
                self.session.acknowledge(alert_id, &mut self.ledger)
            }
            DriverEvent::Inbound(Some(message)) => {
                self.session.on_message(message, &mut self.ledger);
                if self.session.state() == ConnectionState::Joined {
                    self.join_deadline = None;
                }
                Vec::new()
            }
            DriverEvent::Inbound(None) => {
                self.link = None;
                let epoch = self.session.epoch();
                self.session
                    .on_dropped(epoch, &ChannelError::Dropped("connection closed".to_string()))
            }
            DriverEvent::Connected(epoch, Ok(link)) => {
                self.connecting = None;
                if self.session.is_current(epoch) {
                    self.link = Some(link);
                    self.session.on_connected(epoch)
                } else {
                    tracing::debug!(epoch, "Discarding connection for a stale join");
                    Vec::new()
                }
            }
            DriverEvent::Connected(epoch, Err(error)) => {
                self.connecting = None;
                self.session.on_dropped(epoch, &error)
            }
            DriverEvent::Retry(epoch) => {
                self.retry_at = None;
                self.session.retry(epoch)
            }
            DriverEvent::JoinTimeout(epoch) => {
                self.join_deadline = None;
                self.session.on_join_timeout(epoch)
            }
        }
    }

    async fn execute(&mut self, commands: Vec<SessionCommand>) {
        for command in commands {
            match command {
                SessionCommand::Connect { epoch } => {
                    let connector = self.connector.clone();
                    let timeout = self.settings.join_timeout;
                    let future: ConnectFuture = Box::pin(async move {
                        tokio::time::timeout(timeout, connector.connect())
                            .await
                            .unwrap_or(Err(ChannelError::Timeout))
                    });
                    self.connecting = Some(PendingConnect { epoch, future });
                }
                SessionCommand::Send(message) => {
                    let Some(link) = self.link.as_ref() else {
                        tracing::debug!(?message, "No open link; message not sent");
                        continue;
                    };
                    if link.outbound.send(message).await.is_err() {
                        tracing::debug!("Link writer closed; waiting for drop");
                    }
                }
                SessionCommand::Close => {
                    self.link = None;
                    self.connecting = None;
                    self.retry_at = None;
                    self.join_deadline = None;
                }
                SessionCommand::ScheduleRetry { epoch, delay } => {
                    self.retry_at = Some((epoch, Instant::now() + delay));
                }
                SessionCommand::ArmJoinTimeout { epoch } => {
                    self.join_deadline = Some((epoch, Instant::now() + self.settings.join_timeout));
                }
                SessionCommand::Fatal(error) => {
                    let _ = self.notices_tx.send(error);
                }
            }
        }
    }

    fn publish(&self) {
        let state = self.session.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        let alerts = self.ledger.list();
        self.alerts_tx.send_if_modified(|current| {
            if *current == alerts {
                false
            } else {
                *current = alerts;
                true
            }
        });
    }
}

async fn recv_inbound(link: &mut Option<ChannelLink>) -> Option<HubMessage> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn await_connect(
    pending: &mut Option<PendingConnect>,
) -> (u64, Result<ChannelLink, ChannelError>) {
    match pending {
        Some(pending) => {
            let result = pending.future.as_mut().await;
            (pending.epoch, result)
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<(u64, Instant)>) -> u64 {
    match deadline {
        Some((epoch, at)) => {
            tokio::time::sleep_until(at).await;
            epoch
        }
        None => std::future::pending().await,
    }
}

/// UI-side handle to a running driver. Dropping it stops the driver.
pub struct SessionHandle {
    requests: mpsc::Sender<SessionRequest>,
    state: watch::Receiver<ConnectionState>,
    alerts: watch::Receiver<Vec<Alert>>,
    notices: broadcast::Sender<ChannelError>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn join(&self, room: impl Into<RoomId>) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SessionRequest::Join {
                room: room.into(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Stopped)?;
        response.await.map_err(|_| SessionError::Stopped)?
    }

    pub async fn leave(&self) -> Result<(), SessionError> {
        self.requests
            .send(SessionRequest::Leave)
            .await
            .map_err(|_| SessionError::Stopped)
    }

    pub async fn acknowledge(&self, alert_id: impl Into<AlertId>) -> Result<(), SessionError> {
        self.requests
            .send(SessionRequest::Acknowledge(alert_id.into()))
            .await
            .map_err(|_| SessionError::Stopped)
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ledger view, newest first.
    pub fn alerts(&self) -> watch::Receiver<Vec<Alert>> {
        self.alerts.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<ChannelError> {
        self.notices.subscribe()
    }

    pub async fn shutdown(self) {
        let Self { requests, task, .. } = self;
        drop(requests);
        if let Err(error) = task.await {
            tracing::warn!(error = %error, "Channel driver ended abnormally");
        }
    }
}
