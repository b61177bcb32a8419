//! Room-scoped real-time channel between facility viewers and the dispatch hub

mod driver;
mod protocol;
mod session;

pub use driver::{ChannelConnector, ChannelLink, SessionDriver, SessionHandle, SessionSettings};
pub use protocol::{ClientMessage, EventKind, HubMessage};
pub use session::{
    ChannelError, ChannelSession, ConnectionState, EventHandler, ReconnectPolicy, SessionCommand,
    SessionError,
};
