//! ambulink-core - Core library for AmbuLink
//!
//! This crate contains the shared models, the device-side record outbox, the
//! triage classifier, and the facility-side channel session and alert ledger
//! used by the hub and the CLI.

pub mod channel;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod outbox;
pub mod services;
pub mod triage;
pub mod util;

pub use error::{Error, Result};
pub use models::{Acknowledgment, Alert, AlertId, FieldRecord, RecordId, RecordPayload, RoomId, Severity, Vitals};
