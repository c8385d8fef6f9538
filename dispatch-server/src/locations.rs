//! Latest known driver positions.
//!
//! One record per driver, replaced on every update. Records older than the
//! staleness threshold are ignored by every query; [`DriverLocationStore::prune_stale`]
//! only reclaims memory and is never needed for correctness.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::domain::{Coordinate, ParticipantId};

/// A driver's last reported position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRecord {
    pub driver_id: ParticipantId,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Degrees clockwise from north, 0..=360.
    pub heading: Option<f64>,
    /// Metres per second.
    pub speed: Option<f64>,
    pub updated_at: DateTime<Utc>,
    /// Arrival order of the update that produced this record.
    #[serde(skip)]
    pub sequence: u64,
}

impl LocationRecord {
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now - self.updated_at > threshold
    }
}

/// One result of a proximity query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyDriver {
    pub driver_id: ParticipantId,
    pub coordinate: Coordinate,
    pub distance_km: f64,
}

/// A position update as supplied by a driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub coordinate: Coordinate,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

impl PositionUpdate {
    pub fn at(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            heading: None,
            speed: None,
        }
    }
}

/// Thread-safe store of driver positions.
pub struct DriverLocationStore {
    records: DashMap<ParticipantId, LocationRecord>,
    staleness: Duration,
    sequence: AtomicU64,
}

impl DriverLocationStore {
    /// Create an empty store with the given staleness threshold.
    pub fn new(staleness: Duration) -> Self {
        Self {
            records: DashMap::new(),
            staleness,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Record a position stamped with the current time.
    ///
    /// Returns the record it replaced, so callers can measure movement.
    pub fn update(
        &self,
        driver_id: &ParticipantId,
        update: PositionUpdate,
    ) -> Option<LocationRecord> {
        self.update_at(driver_id, update, Utc::now())
    }

    /// Record a position stamped with `now`.
    pub fn update_at(
        &self,
        driver_id: &ParticipantId,
        update: PositionUpdate,
        now: DateTime<Utc>,
    ) -> Option<LocationRecord> {
        let record = LocationRecord {
            driver_id: driver_id.clone(),
            coordinate: update.coordinate,
            heading: update.heading,
            speed: update.speed,
            updated_at: now,
            sequence: self.sequence.fetch_add(1, AtomicOrdering::Relaxed),
        };
        self.records.insert(driver_id.clone(), record)
    }

    /// The stored record for a driver, fresh or not.
    pub fn get(&self, driver_id: &ParticipantId) -> Option<LocationRecord> {
        self.records.get(driver_id).map(|r| r.value().clone())
    }

    /// The stored record for a driver if it is not stale at `now`.
    pub fn get_fresh(
        &self,
        driver_id: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Option<LocationRecord> {
        self.get(driver_id).filter(|r| !r.is_stale(now, self.staleness))
    }

    /// Fresh drivers within `radius_km` of `center`, nearest first.
    pub fn nearby(&self, center: &Coordinate, radius_km: f64) -> Vec<NearbyDriver> {
        self.nearby_at(center, radius_km, Utc::now())
    }

    /// [`nearby`](Self::nearby) evaluated at an explicit time.
    pub fn nearby_at(
        &self,
        center: &Coordinate,
        radius_km: f64,
        now: DateTime<Utc>,
    ) -> Vec<NearbyDriver> {
        self.nearby_matching(center, radius_km, now, |_| true)
    }

    /// Like [`nearby_at`](Self::nearby_at), restricted to drivers accepted by `include`.
    ///
    /// Ties on distance are broken by update arrival order.
    pub fn nearby_matching(
        &self,
        center: &Coordinate,
        radius_km: f64,
        now: DateTime<Utc>,
        include: impl Fn(&ParticipantId) -> bool,
    ) -> Vec<NearbyDriver> {
        let mut hits: Vec<(NearbyDriver, u64)> = self
            .records
            .iter()
            .filter(|entry| !entry.is_stale(now, self.staleness) && include(entry.key()))
            .filter_map(|entry| {
                let distance_km = center.distance_km(&entry.coordinate);
                (distance_km <= radius_km).then(|| {
                    (
                        NearbyDriver {
                            driver_id: entry.driver_id.clone(),
                            coordinate: entry.coordinate,
                            distance_km,
                        },
                        entry.sequence,
                    )
                })
            })
            .collect();

        hits.sort_by(|(a, a_seq), (b, b_seq)| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(Ordering::Equal)
                .then(a_seq.cmp(b_seq))
        });
        hits.into_iter().map(|(hit, _)| hit).collect()
    }

    /// All records that are fresh at `now`, in update order.
    pub fn fresh_at(&self, now: DateTime<Utc>) -> Vec<LocationRecord> {
        let mut fresh: Vec<LocationRecord> = self
            .records
            .iter()
            .filter(|entry| !entry.is_stale(now, self.staleness))
            .map(|entry| entry.value().clone())
            .collect();
        fresh.sort_by_key(|r| r.sequence);
        fresh
    }

    /// Forget a driver.
    pub fn remove(&self, driver_id: &ParticipantId) -> Option<LocationRecord> {
        self.records.remove(driver_id).map(|(_, record)| record)
    }

    /// Drop every record that is stale at `now`. Returns how many were dropped.
    pub fn prune_stale(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_stale(now, self.staleness));
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    fn at(lat: f64, lon: f64) -> PositionUpdate {
        PositionUpdate::at(Coordinate::new(lat, lon).unwrap())
    }

    fn store() -> DriverLocationStore {
        DriverLocationStore::new(Duration::minutes(5))
    }

    #[test]
    fn update_returns_previous_record() {
        let store = store();
        let d = pid("d1");
        assert!(store.update(&d, at(31.52, 74.33)).is_none());

        let previous = store.update(&d, at(31.53, 74.33)).unwrap();
        assert_eq!(previous.coordinate, Coordinate::new(31.52, 74.33).unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&d).unwrap().coordinate,
            Coordinate::new(31.53, 74.33).unwrap()
        );
    }

    #[test]
    fn nearby_sorted_and_bounded() {
        let store = store();
        let center = Coordinate::new(31.52, 74.33).unwrap();
        store.update(&pid("far"), at(31.60, 74.33));
        store.update(&pid("near"), at(31.521, 74.331));
        store.update(&pid("mid"), at(31.54, 74.33));

        let hits = store.nearby(&center, 5.0);
        let ids: Vec<_> = hits.iter().map(|h| h.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(hits[0].distance_km < hits[1].distance_km);
    }

    #[test]
    fn ties_broken_by_arrival_order() {
        let store = store();
        let center = Coordinate::new(0.0, 0.0).unwrap();
        store.update(&pid("second"), at(0.01, 0.0));
        store.update(&pid("first"), at(0.01, 0.0));
        // Re-sending moves "second" to the back of the arrival order.
        store.update(&pid("second"), at(0.01, 0.0));

        let ids: Vec<_> = store
            .nearby(&center, 5.0)
            .into_iter()
            .map(|h| h.driver_id.to_string())
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn stale_records_excluded_without_removal() {
        let store = store();
        let now = Utc::now();
        let center = Coordinate::new(31.52, 74.33).unwrap();
        store.update_at(&pid("old"), at(31.52, 74.33), now - Duration::minutes(6));
        store.update_at(&pid("edge"), at(31.52, 74.33), now - Duration::minutes(5));

        let ids: Vec<_> = store
            .nearby_at(&center, 1.0, now)
            .into_iter()
            .map(|h| h.driver_id.to_string())
            .collect();
        assert_eq!(ids, vec!["edge"]);
        assert_eq!(store.len(), 2);
        assert!(store.get_fresh(&pid("old"), now).is_none());
        assert!(store.get(&pid("old")).is_some());
    }

    #[test]
    fn prune_and_remove() {
        let store = store();
        let now = Utc::now();
        store.update_at(&pid("old"), at(1.0, 1.0), now - Duration::minutes(10));
        store.update_at(&pid("new"), at(1.0, 1.0), now);

        assert_eq!(store.prune_stale(now), 1);
        assert_eq!(store.len(), 1);
        assert!(store.remove(&pid("new")).is_some());
        assert!(store.remove(&pid("new")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn nearby_matching_filters() {
        let store = store();
        let center = Coordinate::new(0.0, 0.0).unwrap();
        store.update(&pid("a"), at(0.001, 0.0));
        store.update(&pid("b"), at(0.002, 0.0));

        let hits = store.nearby_matching(&center, 5.0, Utc::now(), |id| id.as_str() == "b");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].driver_id.as_str(), "b");
    }
}
