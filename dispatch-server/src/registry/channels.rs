//! Ride id → subscribed connections.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::domain::RideId;

use super::connections::{ConnectionHandle, ConnectionId};

/// Result of publishing to a ride channel.
#[derive(Debug)]
pub struct PublishReport<M> {
    pub delivered: usize,
    /// Members whose connection was dead. Already removed from the channel.
    pub failed: Vec<ConnectionHandle<M>>,
}

/// Subscription sets per ride.
///
/// A set exists only while it has members: it is created by the first
/// subscribe and deleted by the last unsubscribe. A reverse index from
/// connection to rides makes disconnect cleanup proportional to the
/// connection's own subscriptions.
pub struct RideChannels<M> {
    rides: DashMap<RideId, HashMap<ConnectionId, ConnectionHandle<M>>>,
    memberships: DashMap<ConnectionId, HashSet<RideId>>,
}

impl<M> Default for RideChannels<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> RideChannels<M> {
    pub fn new() -> Self {
        Self {
            rides: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// Add a member. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, ride_id: &RideId, handle: &ConnectionHandle<M>) -> bool {
        let added = self
            .rides
            .entry(ride_id.clone())
            .or_default()
            .insert(handle.id(), handle.clone())
            .is_none();
        self.memberships
            .entry(handle.id())
            .or_default()
            .insert(ride_id.clone());
        added
    }

    /// Remove a member. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, ride_id: &RideId, connection: ConnectionId) -> bool {
        let removed = self.remove_member(ride_id, connection);
        if let Some(mut rides) = self.memberships.get_mut(&connection) {
            rides.remove(ride_id);
        }
        self.memberships.remove_if(&connection, |_, rides| rides.is_empty());
        removed
    }

    /// Remove a connection from every channel. Returns the rides it left.
    pub fn remove_connection(&self, connection: ConnectionId) -> Vec<RideId> {
        let Some((_, rides)) = self.memberships.remove(&connection) else {
            return Vec::new();
        };
        rides
            .into_iter()
            .filter(|ride_id| self.remove_member(ride_id, connection))
            .collect()
    }

    fn remove_member(&self, ride_id: &RideId, connection: ConnectionId) -> bool {
        let removed = self
            .rides
            .get_mut(ride_id)
            .is_some_and(|mut members| members.remove(&connection).is_some());
        self.rides.remove_if(ride_id, |_, members| members.is_empty());
        removed
    }

    /// Snapshot of a ride's members.
    pub fn members(&self, ride_id: &RideId) -> Vec<ConnectionHandle<M>> {
        self.rides
            .get(ride_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, ride_id: &RideId, connection: ConnectionId) -> bool {
        self.rides
            .get(ride_id)
            .is_some_and(|members| members.contains_key(&connection))
    }

    /// Rides a connection is subscribed to.
    pub fn rides_of(&self, connection: ConnectionId) -> Vec<RideId> {
        self.memberships
            .get(&connection)
            .map(|rides| rides.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rides with at least one member.
    pub fn ride_count(&self) -> usize {
        self.rides.len()
    }

    pub fn contains(&self, ride_id: &RideId) -> bool {
        self.rides.contains_key(ride_id)
    }
}

impl<M: Clone> RideChannels<M> {
    /// Deliver to every current member of a ride.
    ///
    /// Members are snapshotted first and sent to without holding the map.
    /// A dead member is removed from this channel and reported; it does not
    /// affect delivery to the others.
    pub fn publish(&self, ride_id: &RideId, message: &M) -> PublishReport<M> {
        let mut report = PublishReport {
            delivered: 0,
            failed: Vec::new(),
        };
        for member in self.members(ride_id) {
            match member.send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    self.unsubscribe(ride_id, member.id());
                    report.failed.push(member);
                }
            }
        }
        report
    }
}
