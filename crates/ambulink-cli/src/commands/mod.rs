pub mod capture;
pub mod classify;
pub mod common;
pub mod pending;
pub mod sync;
pub mod watch;
