//! The table of live ride requests.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::domain::{ParticipantId, RequestId, RideRequest};

/// Live ride requests, at most one per rider.
///
/// Expiry only affects matching eligibility: an expired request stays here
/// until it is cancelled, replaced or accepted.
#[derive(Default)]
pub struct RideRequestBook {
    by_rider: DashMap<ParticipantId, RideRequest>,
    riders: DashMap<RequestId, ParticipantId>,
}

impl RideRequestBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a request, returning the one it replaced for the same rider.
    pub fn insert(&self, request: RideRequest) -> Option<RideRequest> {
        self.riders.insert(request.id.clone(), request.rider_id.clone());
        let replaced = self.by_rider.insert(request.rider_id.clone(), request);
        if let Some(previous) = &replaced {
            self.riders.remove(&previous.id);
        }
        replaced
    }

    pub fn get(&self, id: &RequestId) -> Option<RideRequest> {
        let rider = self.riders.get(id)?.value().clone();
        self.by_rider
            .get(&rider)
            .filter(|request| &request.id == id)
            .map(|request| request.value().clone())
    }

    pub fn get_by_rider(&self, rider: &ParticipantId) -> Option<RideRequest> {
        self.by_rider.get(rider).map(|r| r.value().clone())
    }

    /// Remove a rider's request, whatever its id.
    pub fn remove_by_rider(&self, rider: &ParticipantId) -> Option<RideRequest> {
        let (_, request) = self.by_rider.remove(rider)?;
        self.riders.remove(&request.id);
        Some(request)
    }

    /// Remove a rider's request only if it has the given id.
    pub fn remove_if_matches(&self, rider: &ParticipantId, id: &RequestId) -> Option<RideRequest> {
        let (_, request) = self.by_rider.remove_if(rider, |_, r| &r.id == id)?;
        self.riders.remove(&request.id);
        Some(request)
    }

    /// Atomically take a request by id.
    ///
    /// Of several concurrent callers for the same id, exactly one gets it.
    pub fn take(&self, id: &RequestId) -> Option<RideRequest> {
        let rider = self.riders.get(id)?.value().clone();
        self.remove_if_matches(&rider, id)
    }

    /// Record that `driver` has been shown the request. Returns `false` if it
    /// already had been, or the request is gone.
    pub fn mark_notified(&self, id: &RequestId, driver: &ParticipantId) -> bool {
        let Some(rider) = self.riders.get(id).map(|r| r.value().clone()) else {
            return false;
        };
        self.by_rider
            .get_mut(&rider)
            .filter(|request| &request.id == id)
            .is_some_and(|mut request| request.notified.insert(driver.clone()))
    }

    /// Snapshot of every request still eligible for matching at `now`.
    pub fn live(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<RideRequest> {
        let mut live: Vec<RideRequest> = self
            .by_rider
            .iter()
            .filter(|r| !r.is_expired(now, ttl))
            .map(|r| r.value().clone())
            .collect();
        live.sort_by_key(|r| r.created_at);
        live
    }

    pub fn len(&self) -> usize {
        self.by_rider.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rider.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinate, Place};
    use std::sync::Arc;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    fn request(rider: &str, created_at: DateTime<Utc>) -> RideRequest {
        let place = Place::new(Coordinate::new(31.52, 74.33).unwrap());
        RideRequest::new(pid(rider), place.clone(), place, 300.0, 5.0, created_at)
    }

    #[test]
    fn one_request_per_rider() {
        let book = RideRequestBook::new();
        let first = request("r1", Utc::now());
        let second = request("r1", Utc::now());

        assert!(book.insert(first.clone()).is_none());
        let replaced = book.insert(second.clone()).unwrap();
        assert_eq!(replaced.id, first.id);
        assert_eq!(book.len(), 1);
        assert!(book.get(&first.id).is_none());
        assert_eq!(book.get(&second.id).unwrap().id, second.id);
    }

    #[test]
    fn take_removes_exactly_once() {
        let book = RideRequestBook::new();
        let req = request("r1", Utc::now());
        book.insert(req.clone());

        assert_eq!(book.take(&req.id).unwrap().id, req.id);
        assert!(book.take(&req.id).is_none());
        assert!(book.is_empty());
    }

    #[test]
    fn remove_if_matches_ignores_replaced_id() {
        let book = RideRequestBook::new();
        let old = request("r1", Utc::now());
        let new = request("r1", Utc::now());
        book.insert(old.clone());
        book.insert(new.clone());

        assert!(book.remove_if_matches(&pid("r1"), &old.id).is_none());
        assert!(book.remove_if_matches(&pid("r1"), &new.id).is_some());
    }

    #[test]
    fn expired_requests_stay_but_are_not_live() {
        let book = RideRequestBook::new();
        let now = Utc::now();
        book.insert(request("old", now - Duration::minutes(6)));
        book.insert(request("new", now));

        let live = book.live(now, Duration::minutes(5));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].rider_id, pid("new"));
        assert_eq!(book.len(), 2);
        assert!(book.get_by_rider(&pid("old")).is_some());
    }

    #[test]
    fn notified_drivers_tracked_once() {
        let book = RideRequestBook::new();
        let req = request("r1", Utc::now());
        book.insert(req.clone());

        assert!(book.mark_notified(&req.id, &pid("d1")));
        assert!(!book.mark_notified(&req.id, &pid("d1")));
        assert!(book.get(&req.id).unwrap().notified.contains(&pid("d1")));

        book.remove_by_rider(&pid("r1"));
        assert!(!book.mark_notified(&req.id, &pid("d2")));
    }

    #[test]
    fn concurrent_take_has_one_winner() {
        let book = Arc::new(RideRequestBook::new());
        let req = request("r1", Utc::now());
        book.insert(req.clone());

        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let book = Arc::clone(&book);
                    let id = req.id.clone();
                    s.spawn(move || book.take(&id).is_some())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });
        assert_eq!(winners, 1);
    }
}
