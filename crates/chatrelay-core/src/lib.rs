pub mod config;
pub mod errors;
pub mod frames;

pub use config::RelayConfig;
pub use errors::RelayError;
pub use frames::{classify, ForwardKind, ForwardPayload, OutboundFrame, UpstreamEvent};
