//! Durable delivery of captured records to the facility endpoint

mod engine;
mod submitter;

pub use engine::{
    DrainReport, DrainSummary, DrainTrigger, OutboxEngine, OutboxHandle, OutboxSettings,
    QueueStatus, StatusCallback, SyncOutcome, SyncStatus,
};
pub use submitter::{
    Acceptance, HttpRecordSubmitter, RecordSubmitter, SubmitError, SubmitResult,
};
