pub mod dispatcher;
mod events;
pub mod forwarder;
pub mod registry;

#[cfg(test)]
pub(crate) mod testutil;

pub use dispatcher::RelayDispatcher;
pub use forwarder::Forwarder;
pub use registry::{SessionEntry, SessionInfo, SessionRegistry, IDLE_CLOSE_REASON};
