//! Realtime dispatch server for ride hailing.
//!
//! Tracks where drivers are, offers ride requests to nearby listening
//! drivers and fans ride lifecycle events out to exactly the parties
//! subscribed to each ride.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod locations;
pub mod registry;
pub mod web;
