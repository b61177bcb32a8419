use std::sync::Arc;

use ambulink_core::channel::{
    ChannelError, ConnectionState, EventKind, HubMessage, SessionDriver, SessionHandle,
    SessionSettings,
};
use ambulink_core::config::ClientConfig;
use ambulink_core::{AlertId, RoomId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::commands::common::{format_alert_line, format_clock_time};
use crate::error::CliError;
use crate::transport::WebSocketConnector;

/// Typed-in commands while watching a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    Ack(AlertId),
    Join(RoomId),
    Leave,
    List,
    Quit,
}

pub fn parse_watch_command(line: &str) -> Result<Option<WatchCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let argument = parts.next();

    let command = match (verb.to_ascii_lowercase().as_str(), argument) {
        ("ack", Some(id)) => WatchCommand::Ack(AlertId::from(id)),
        ("join", Some(room)) => WatchCommand::Join(RoomId::from(room)),
        ("leave", None) => WatchCommand::Leave,
        ("list" | "ls", None) => WatchCommand::List,
        ("quit" | "exit", None) => WatchCommand::Quit,
        ("ack", None) => return Err("usage: ack <alert-id>".to_string()),
        ("join", None) => return Err("usage: join <room>".to_string()),
        _ => return Err(format!("unknown command: {}", line.trim())),
    };
    Ok(Some(command))
}

pub async fn run_watch(room: &str, config: &ClientConfig) -> Result<(), CliError> {
    let room = RoomId::new(room);
    if room.is_empty() {
        return Err(CliError::EmptyRoom);
    }

    let connector = Arc::new(WebSocketConnector::new(
        config.channel_url()?,
        config.api_token.clone(),
    ));
    let handle = SessionDriver::new(connector, SessionSettings::from(config))
        .on_event(EventKind::NewAlert, |event| {
            if let HubMessage::NewAlert { alert } = event {
                println!("NEW   {}", format_alert_line(alert));
            }
        })
        .on_event(EventKind::VitalsUpdate, |event| {
            if let HubMessage::VitalsUpdate {
                alert_id, severity, ..
            } = event
            {
                println!("VITALS {alert_id} now {severity}");
            }
        })
        .on_event(EventKind::AlertAcknowledged, |event| {
            if let HubMessage::AlertAcknowledged {
                alert_id,
                acknowledged_by,
                acknowledged_at,
                ..
            } = event
            {
                let by = acknowledged_by.as_deref().unwrap_or("unknown");
                let at = acknowledged_at.map_or_else(|| "-".to_string(), format_clock_time);
                println!("ACK   {alert_id} by {by} at {at}");
            }
        })
        .spawn();

    handle.join(room).await?;
    println!("Commands: ack <alert-id>, join <room>, leave, list, quit");

    let outcome = watch_loop(&handle).await;
    handle.shutdown().await;
    outcome
}

async fn watch_loop(handle: &SessionHandle) -> Result<(), CliError> {
    let mut state = handle.state();
    let mut notices = handle.notices();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = *state.borrow_and_update();
                println!("[channel] {current}");
                if current == ConnectionState::Joined {
                    print_alerts(handle);
                }
            }
            notice = notices.recv() => match notice {
                Ok(error @ ChannelError::Exhausted { .. }) => return Err(error.into()),
                Ok(error) => eprintln!("[channel] {error}"),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                match parse_watch_command(&line) {
                    Ok(Some(WatchCommand::Quit)) => return Ok(()),
                    Ok(Some(command)) => apply_command(handle, command).await?,
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }
        }
    }
}

async fn apply_command(handle: &SessionHandle, command: WatchCommand) -> Result<(), CliError> {
    match command {
        WatchCommand::Ack(alert_id) => handle.acknowledge(alert_id).await?,
        WatchCommand::Join(room) => {
            handle.leave().await?;
            handle.join(room).await?;
        }
        WatchCommand::Leave => handle.leave().await?,
        WatchCommand::List => print_alerts(handle),
        WatchCommand::Quit => {}
    }
    Ok(())
}

fn print_alerts(handle: &SessionHandle) {
    let alerts = handle.alerts().borrow().clone();
    if alerts.is_empty() {
        println!("No alerts.");
    }
    for alert in &alerts {
        println!("      {}", format_alert_line(alert));
    }
}
