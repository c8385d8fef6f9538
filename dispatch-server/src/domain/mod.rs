//! Domain types for ride dispatch.
//!
//! This module contains the validated value types that flow through the
//! dispatch engine. Types enforce their invariants at construction time,
//! so code that receives them can trust their validity.

mod error;
mod geo;
mod participant;
mod request;
mod ride;

pub use error::{BlankId, TransitionError};
pub use geo::{Coordinate, EARTH_RADIUS_KM, InvalidCoordinate, distance_km};
pub use participant::{InvalidParticipantId, Participant, ParticipantId, Role};
pub use request::{Place, RequestId, RideRequest};
pub use ride::{Ride, RideEvent, RideEventKind, RideId, RideStatus, StatusChange};
