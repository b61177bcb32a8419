use std::io;

use ambulink_core::channel::{ChannelError, SessionError};
use ambulink_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ambulink_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Chief complaint cannot be empty")]
    EmptyComplaint,
    #[error("Room id cannot be empty")]
    EmptyRoom,
    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),
}
