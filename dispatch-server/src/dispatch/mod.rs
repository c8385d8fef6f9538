//! Dispatch engine: message protocol, matching and ride lifecycle fan-out.
//!
//! The engine is transport-agnostic. A connection is an unbounded channel
//! of [`ServerMessage`]s plus the participant it belongs to; whatever sits
//! on the other end (a WebSocket task, a test) drains it.

mod config;
mod engine;
mod error;
mod journal;
mod protocol;
mod requests;
mod rides;


pub use config::DispatchConfig;
pub use engine::{Connection, Dispatcher, NewRide, SweepReport};
pub use error::{DispatchError, ErrorCode};
pub use journal::{InMemoryJournal, JournalError, RideJournal};
pub use protocol::{
    CLIENT_MESSAGE_TYPES, CancelReason, ClientMessage, NewRideRequest, ServerMessage, round_km,
};
pub use requests::RideRequestBook;
pub use rides::RideBook;
