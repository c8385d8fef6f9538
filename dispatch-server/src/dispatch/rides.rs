//! Live ride records, each behind its own lock.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::{ParticipantId, Ride, RideId};

/// A shared, individually locked ride record.
pub type RideCell = Arc<Mutex<Ride>>;

/// Rides known to the engine.
///
/// The map lock is only held to look a ride up; transitions lock the ride
/// itself, so concurrent updates to one ride serialize without blocking
/// unrelated rides.
#[derive(Default)]
pub struct RideBook {
    rides: DashMap<RideId, RideCell>,
    /// Driver → rides they have been assigned. May hold finished rides
    /// until the next lookup or sweep prunes them.
    assignments: DashMap<ParticipantId, HashSet<RideId>>,
}

/// Lock a ride record. A poisoned lock is recovered: every critical
/// section either applies a whole transition or none of it.
pub fn lock(cell: &RideCell) -> MutexGuard<'_, Ride> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RideBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ride. Returns `false`, leaving the book unchanged, if the id is
    /// taken.
    pub fn insert(&self, ride: Ride) -> bool {
        match self.rides.entry(ride.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(ride)));
                true
            }
        }
    }

    pub fn get(&self, id: &RideId) -> Option<RideCell> {
        self.rides.get(id).map(|cell| Arc::clone(cell.value()))
    }

    /// A copy of the ride as it is now.
    pub fn snapshot(&self, id: &RideId) -> Option<Ride> {
        self.get(id).map(|cell| lock(&cell).clone())
    }

    /// Remember that `driver` is assigned to `ride`.
    pub fn record_assignment(&self, ride: &RideId, driver: &ParticipantId) {
        self.assignments
            .entry(driver.clone())
            .or_default()
            .insert(ride.clone());
    }

    /// Non-terminal rides with `driver` assigned.
    pub fn active_for_driver(&self, driver: &ParticipantId) -> Vec<RideId> {
        let Some(candidates) = self
            .assignments
            .get(driver)
            .map(|rides| rides.iter().cloned().collect::<Vec<_>>())
        else {
            return Vec::new();
        };

        let (active, finished): (Vec<RideId>, Vec<RideId>) = candidates
            .into_iter()
            .partition(|id| self.is_assigned_and_active(id, driver));

        if !finished.is_empty() {
            if let Some(mut rides) = self.assignments.get_mut(driver) {
                for id in &finished {
                    rides.remove(id);
                }
            }
            self.assignments.remove_if(driver, |_, rides| rides.is_empty());
        }
        active
    }

    fn is_assigned_and_active(&self, id: &RideId, driver: &ParticipantId) -> bool {
        self.get(id).is_some_and(|cell| {
            let ride = lock(&cell);
            !ride.status.is_terminal() && ride.driver_id.as_ref() == Some(driver)
        })
    }

    /// Forget rides that finished before `cutoff`, and assignments to rides
    /// that are no longer active. Returns how many rides went.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.rides.len();
        self.rides.retain(|_, cell| {
            let ride = lock(cell);
            let finished_at = ride.completed_at.or(ride.cancelled_at);
            !(ride.status.is_terminal() && finished_at.is_some_and(|at| at < cutoff))
        });
        let pruned = before.saturating_sub(self.rides.len());

        self.assignments.retain(|driver, rides| {
            rides.retain(|id| self.is_assigned_and_active(id, driver));
            !rides.is_empty()
        });
        pruned
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }
}
