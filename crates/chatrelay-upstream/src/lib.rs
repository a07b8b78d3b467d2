pub mod connection;

pub use connection::{ConnectionState, UpstreamConnection, UpstreamEndpoint};
