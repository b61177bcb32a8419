//! Async service wrappers shared by clients

mod record_store;

pub use record_store::RecordStoreService;
