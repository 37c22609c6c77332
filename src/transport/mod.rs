mod client;
mod error;
mod protocol;

pub use client::{TransportClient, TransportConfig, TransportEvent};
pub use protocol::PositionUpdate;

#[cfg(test)]
pub(crate) use client::tests::{fake_server, next_accepted, next_message};
