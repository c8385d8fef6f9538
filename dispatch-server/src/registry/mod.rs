//! Shared connection and subscription registries.
//!
//! Both registries are generic over the outbound message type so they stay
//! independent of the wire protocol. Neither performs a send while holding
//! one of its map locks.

mod channels;
mod connections;

pub use channels::{PublishReport, RideChannels};
pub use connections::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, Delivery, Outbox, Undeliverable,
};
