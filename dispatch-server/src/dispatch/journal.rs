//! Ride event journal.
//!
//! Durable ride records live outside this process. The engine mirrors every
//! applied transition into a [`RideJournal`] after the ride lock is released
//! and before the event is published; a failed write is logged and the
//! transition stands.

use std::sync::{Mutex, PoisonError};

use crate::domain::{RideEvent, RideId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    /// The backing store refused or could not take the write
    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

/// Sink for applied ride transitions.
pub trait RideJournal: Send + Sync {
    fn record(&self, event: &RideEvent) -> Result<(), JournalError>;
}

/// Journal that keeps every event in memory.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    events: Mutex<Vec<RideEvent>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, oldest first.
    pub fn events(&self) -> Vec<RideEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events for one ride, oldest first.
    pub fn events_for(&self, ride_id: &RideId) -> Vec<RideEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| &e.ride_id == ride_id)
            .cloned()
            .collect()
    }
}

impl RideJournal for InMemoryJournal {
    fn record(&self, event: &RideEvent) -> Result<(), JournalError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
