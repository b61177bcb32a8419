//! Data models for AmbuLink

mod alert;
mod record;
mod severity;
mod vitals;

pub use alert::{Acknowledgment, Alert, AlertId, RoomId};
pub use record::{Coordinates, FieldRecord, RecordId, RecordPayload, RecordSubmission};
pub use severity::Severity;
pub use vitals::{Reading, Vitals};
