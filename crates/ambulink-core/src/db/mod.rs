//! Database layer for the device-local outbox

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{
    PendingScan, QueueCounts, RecordRepository, SkippedRecord, SqliteRecordRepository,
};
