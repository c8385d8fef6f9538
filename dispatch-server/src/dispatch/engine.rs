//! The dispatch engine.
//!
//! One [`Dispatcher`] is built at startup and shared by every connection
//! task. It owns all shared state; connection tasks only hand it parsed
//! frames and the handle of the connection they came from.
//!
//! Lock discipline: every map lock is held for a single map operation, and
//! nothing is sent while one is held. Ride records have their own mutex,
//! which is released before the journal write and before any publish.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::{debug, error, info, warn};

use crate::domain::{
    Coordinate, Participant, ParticipantId, Place, RequestId, Ride, RideEvent, RideEventKind,
    RideId, RideRequest, Role, StatusChange,
};
use crate::locations::{DriverLocationStore, NearbyDriver, PositionUpdate};
use crate::registry::{ConnectionHandle, ConnectionRegistry, Delivery, Outbox, RideChannels};

use super::config::DispatchConfig;
use super::error::DispatchError;
use super::journal::{InMemoryJournal, RideJournal};
use super::protocol::{CancelReason, ClientMessage, NewRideRequest, ServerMessage, round_km};
use super::requests::RideRequestBook;
use super::rides::{RideBook, lock};

/// A connection as the engine sees it.
pub type Connection = ConnectionHandle<ServerMessage>;

/// A ride opened outside the message protocol, e.g. by the booking service.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRide {
    /// Externally issued id; generated when absent.
    pub ride_id: Option<RideId>,
    pub rider_id: ParticipantId,
    pub driver_id: Option<ParticipantId>,
    pub pickup: Option<Place>,
    pub dropoff: Option<Place>,
    pub estimated_fare: Option<f64>,
}

impl NewRide {
    pub fn for_rider(rider_id: ParticipantId) -> Self {
        Self {
            ride_id: None,
            rider_id,
            driver_id: None,
            pickup: None,
            dropoff: None,
            estimated_fare: None,
        }
    }
}

/// What a background sweep reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub locations: usize,
    pub rides: usize,
}

/// The Dispatch Engine.
pub struct Dispatcher {
    config: DispatchConfig,
    connections: ConnectionRegistry<ServerMessage>,
    locations: DriverLocationStore,
    channels: RideChannels<ServerMessage>,
    requests: RideRequestBook,
    rides: RideBook,
    listening: DashSet<ParticipantId>,
    journal: Arc<dyn RideJournal>,
}

impl Dispatcher {
    /// Create an engine that journals into memory.
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_journal(config, Arc::new(InMemoryJournal::new()))
    }

    pub fn with_journal(config: DispatchConfig, journal: Arc<dyn RideJournal>) -> Self {
        Self {
            locations: DriverLocationStore::new(config.staleness()),
            config,
            connections: ConnectionRegistry::new(),
            channels: RideChannels::new(),
            requests: RideRequestBook::new(),
            rides: RideBook::new(),
            listening: DashSet::new(),
            journal,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionRegistry<ServerMessage> {
        &self.connections
    }

    pub fn locations(&self) -> &DriverLocationStore {
        &self.locations
    }

    pub fn channels(&self) -> &RideChannels<ServerMessage> {
        &self.channels
    }

    pub fn requests(&self) -> &RideRequestBook {
        &self.requests
    }

    /// Whether a driver is listening for ride requests.
    pub fn is_listening(&self, driver: &ParticipantId) -> bool {
        self.listening.contains(driver)
    }

    // ---- connection lifecycle ----

    /// Admit a connection for an already authenticated participant.
    ///
    /// A previous connection for the same participant is orphaned: it leaves
    /// every ride channel and is told `session_replaced`. Participant state
    /// (location, listening flag, live request) carries over.
    pub fn connect(&self, participant: Participant, outbox: Outbox<ServerMessage>) -> Connection {
        let handle = self.connections.handle(participant, outbox);
        if let Some(replaced) = self.connections.connect(handle.clone()) {
            self.channels.remove_connection(replaced.id());
            // The orphan may already be gone; nothing else to do then.
            let _ = replaced.send(ServerMessage::SessionReplaced);
            info!(
                participant = %handle.participant_id(),
                replaced = %replaced.id(),
                connection = %handle.id(),
                "session replaced"
            );
        } else {
            info!(
                participant = %handle.participant_id(),
                role = handle.participant().role.as_str(),
                connection = %handle.id(),
                "connected"
            );
        }
        handle
    }

    /// Tear down a connection.
    ///
    /// The participant-wide cascade (location, listening flag, live request)
    /// runs only for the registered connection and only once; for an orphaned
    /// or already removed handle this just drops its ride subscriptions.
    /// Returns whether the cascade ran.
    pub fn disconnect(&self, handle: &Connection) -> bool {
        // Registry first: a concurrent `join_channel` that lands after the
        // channel sweep then sees a stale handle and backs out.
        let cascade = self.connections.disconnect(handle);
        let left = self.channels.remove_connection(handle.id());
        if !cascade {
            return false;
        }

        let id = handle.participant_id();
        self.locations.remove(id);
        self.listening.remove(id);
        if let Some(request) = self.requests.remove_by_rider(id) {
            self.withdraw_request(&request, CancelReason::RiderDisconnected, None);
        }
        info!(
            participant = %id,
            connection = %handle.id(),
            rides = left.len(),
            "disconnected"
        );
        true
    }

    // ---- delivery ----

    fn reply(&self, to: &Connection, message: ServerMessage) {
        if to.send(message).is_err() {
            debug!(connection = %to.id(), "reply to closed connection");
            self.disconnect(to);
        }
    }

    /// Best-effort send to a participant. A dead recipient is disconnected;
    /// an absent one is ignored.
    fn deliver(&self, to: &ParticipantId, message: ServerMessage) -> bool {
        match self.connections.send(to, message) {
            Delivery::Delivered => true,
            Delivery::UnknownRecipient => false,
            Delivery::Failed(handle) => {
                warn!(participant = %to, connection = %handle.id(), "delivery failed");
                self.disconnect(&handle);
                false
            }
        }
    }

    fn publish(&self, ride_id: &RideId, message: &ServerMessage) -> usize {
        let report = self.channels.publish(ride_id, message);
        for dead in &report.failed {
            warn!(ride_id = %ride_id, connection = %dead.id(), "ride channel member gone");
            self.disconnect(dead);
        }
        report.delivered
    }

    fn broadcast_fleet(&self, now: DateTime<Utc>) {
        let message = ServerMessage::DriverLocations {
            drivers: self.locations.fresh_at(now),
        };
        for dead in self.connections.broadcast_all(&message) {
            warn!(connection = %dead.id(), "broadcast recipient gone");
            self.disconnect(&dead);
        }
    }

    // ---- inbound messages ----

    /// Handle one inbound text frame. Errors are answered on `from` and never
    /// close it.
    pub fn handle_text(&self, from: &Connection, text: &str) {
        let result = ClientMessage::parse(text).and_then(|message| self.handle(from, message));
        if let Err(err) = result {
            debug!(connection = %from.id(), error = %err, "message rejected");
            self.reply(from, ServerMessage::error(&err));
        }
    }

    /// Handle one validated message.
    pub fn handle(&self, from: &Connection, message: ClientMessage) -> Result<(), DispatchError> {
        if !self.connections.is_current(from) {
            debug!(
                connection = %from.id(),
                kind = message.kind(),
                "dropping message from orphaned connection"
            );
            return Ok(());
        }
        debug!(
            participant = %from.participant_id(),
            kind = message.kind(),
            "message"
        );

        match message {
            ClientMessage::DriverLocation(update) => self.driver_location(from, update),
            ClientMessage::SubscribeToRides => self.subscribe_to_rides(from),
            ClientMessage::UnsubscribeFromRides => self.unsubscribe_from_rides(from),
            ClientMessage::RideRequest(request) => self.ride_request(from, request),
            ClientMessage::CancelRideRequest { request_id } => {
                self.cancel_ride_request(from, request_id)
            }
            ClientMessage::AcceptRideRequest { request_id } => {
                self.accept_ride_request(from, request_id)
            }
            ClientMessage::SubscribeToRide { ride_id } => self.subscribe_to_ride(from, ride_id),
            ClientMessage::UnsubscribeFromRide { ride_id } => {
                self.unsubscribe_from_ride(from, ride_id)
            }
            ClientMessage::UpdateRideStatus {
                ride_id,
                status,
                reason,
            } => self.update_ride_status(from, ride_id, status, reason),
        }
    }

    fn require(from: &Connection, role: Role, kind: &'static str) -> Result<(), DispatchError> {
        if from.participant().role == role {
            Ok(())
        } else {
            Err(DispatchError::WrongRole {
                kind,
                required: role.as_str(),
            })
        }
    }

    fn driver_location(
        &self,
        from: &Connection,
        update: PositionUpdate,
    ) -> Result<(), DispatchError> {
        Self::require(from, Role::Driver, "driver_location")?;
        let driver = from.participant_id();
        let now = Utc::now();

        let previous = self.locations.update_at(driver, update, now);
        self.reply(
            from,
            ServerMessage::LocationUpdated {
                latitude: update.coordinate.latitude(),
                longitude: update.coordinate.longitude(),
                timestamp: now,
            },
        );

        if let Some(record) = self.locations.get(driver) {
            for ride_id in self.rides.active_for_driver(driver) {
                self.publish(&ride_id, &ServerMessage::driver_position(&ride_id, &record));
            }
        }

        let moved = previous.is_none_or(|p| {
            p.coordinate.distance_km(&update.coordinate) >= self.config.rematch_distance_km
        });
        if moved && self.is_listening(driver) {
            let offered = self.offer_live_requests(driver, &update.coordinate, now);
            if offered > 0 {
                debug!(participant = %driver, offered, "re-matched after movement");
            }
        }

        if self.config.broadcast_fleet_positions {
            self.broadcast_fleet(now);
        }
        Ok(())
    }

    fn subscribe_to_rides(&self, from: &Connection) -> Result<(), DispatchError> {
        Self::require(from, Role::Driver, "subscribe_to_rides")?;
        let driver = from.participant_id();
        self.listening.insert(driver.clone());
        self.reply(from, ServerMessage::SubscribedToRides);

        let now = Utc::now();
        if let Some(record) = self.locations.get_fresh(driver, now) {
            self.offer_live_requests(driver, &record.coordinate, now);
        }
        info!(participant = %driver, "listening for ride requests");
        Ok(())
    }

    fn unsubscribe_from_rides(&self, from: &Connection) -> Result<(), DispatchError> {
        Self::require(from, Role::Driver, "unsubscribe_from_rides")?;
        self.listening.remove(from.participant_id());
        self.reply(from, ServerMessage::UnsubscribedFromRides);
        Ok(())
    }

    fn ride_request(&self, from: &Connection, new: NewRideRequest) -> Result<(), DispatchError> {
        Self::require(from, Role::Rider, "ride_request")?;
        let rider = from.participant_id();
        let now = Utc::now();
        let radius_km = self.config.radius_for(new.radius_km);

        let request = RideRequest::new(
            rider.clone(),
            new.pickup,
            new.dropoff,
            new.estimated_fare,
            radius_km,
            now,
        );
        if let Some(previous) = self.requests.insert(request.clone()) {
            self.withdraw_request(&previous, CancelReason::Replaced, None);
        }

        let candidates = self.locations.nearby_matching(
            &request.pickup.coordinate,
            radius_km,
            now,
            |driver| self.listening.contains(driver),
        );
        let count = candidates
            .iter()
            .filter(|candidate| self.offer(&request, candidate))
            .count();

        info!(
            participant = %rider,
            request_id = %request.id,
            candidates = candidates.len(),
            offered = count,
            "ride requested"
        );
        self.reply(
            from,
            ServerMessage::NearbyDrivers {
                request_id: request.id,
                count,
                radius_km,
            },
        );
        Ok(())
    }

    /// Push a request to one candidate unless it has already seen it.
    fn offer(&self, request: &RideRequest, candidate: &NearbyDriver) -> bool {
        if !self.requests.mark_notified(&request.id, &candidate.driver_id) {
            return false;
        }
        self.deliver(
            &candidate.driver_id,
            ServerMessage::RideRequest {
                request_id: request.id.clone(),
                rider_id: request.rider_id.clone(),
                pickup: request.pickup.clone(),
                dropoff: request.dropoff.clone(),
                estimated_fare: request.estimated_fare,
                distance_to_pickup: round_km(candidate.distance_km),
                created_at: request.created_at,
            },
        )
    }

    /// Offer every live request within range to one driver.
    fn offer_live_requests(
        &self,
        driver: &ParticipantId,
        position: &Coordinate,
        now: DateTime<Utc>,
    ) -> usize {
        self.requests
            .live(now, self.config.request_ttl())
            .iter()
            .filter(|request| {
                let distance_km = request.distance_to_pickup(position);
                distance_km <= request.radius_km
                    && self.offer(
                        request,
                        &NearbyDriver {
                            driver_id: driver.clone(),
                            coordinate: *position,
                            distance_km,
                        },
                    )
            })
            .count()
    }

    /// Tell every driver that saw `request` that it is gone.
    fn withdraw_request(
        &self,
        request: &RideRequest,
        reason: CancelReason,
        except: Option<&ParticipantId>,
    ) {
        for driver in &request.notified {
            if Some(driver) == except {
                continue;
            }
            self.deliver(
                driver,
                ServerMessage::RideRequestCancelled {
                    request_id: request.id.clone(),
                    reason,
                },
            );
        }
    }

    fn cancel_ride_request(
        &self,
        from: &Connection,
        request_id: Option<RequestId>,
    ) -> Result<(), DispatchError> {
        Self::require(from, Role::Rider, "cancel_ride_request")?;
        let rider = from.participant_id();

        let removed = match request_id {
            Some(id) => self
                .requests
                .remove_if_matches(rider, &id)
                .ok_or(DispatchError::UnknownRequest(id))?,
            None => self
                .requests
                .remove_by_rider(rider)
                .ok_or(DispatchError::NoActiveRequest)?,
        };

        self.withdraw_request(&removed, CancelReason::RiderCancelled, None);
        info!(participant = %rider, request_id = %removed.id, "ride request cancelled");
        self.reply(
            from,
            ServerMessage::RideRequestCancelled {
                request_id: removed.id,
                reason: CancelReason::RiderCancelled,
            },
        );
        Ok(())
    }

    fn accept_ride_request(
        &self,
        from: &Connection,
        request_id: RequestId,
    ) -> Result<(), DispatchError> {
        Self::require(from, Role::Driver, "accept_ride_request")?;
        let driver = from.participant();
        let now = Utc::now();

        let pending = self
            .requests
            .get(&request_id)
            .ok_or_else(|| DispatchError::UnknownRequest(request_id.clone()))?;
        if pending.is_expired(now, self.config.request_ttl()) {
            return Err(DispatchError::RequestExpired(request_id));
        }
        // Whoever removes the request owns it.
        let request = self
            .requests
            .take(&request_id)
            .ok_or_else(|| DispatchError::UnknownRequest(request_id.clone()))?;

        let mut ride = Ride::new(RideId::generate(), request.rider_id.clone(), request.created_at);
        ride.pickup = Some(request.pickup.clone());
        ride.dropoff = Some(request.dropoff.clone());
        ride.estimated_fare = Some(request.estimated_fare);
        let event = ride.apply(StatusChange::Accepted, driver, None, now)?;
        let ride_id = ride.id.clone();
        if !self.rides.insert(ride) {
            error!(ride_id = %ride_id, "generated ride id collided");
            return Err(DispatchError::Internal);
        }
        self.rides.record_assignment(&ride_id, &driver.id);
        self.record(&event);

        for party in [&request.rider_id, &driver.id] {
            if let Some(handle) = self.connections.get(party) {
                self.join_channel(&ride_id, &handle);
            }
        }

        info!(
            participant = %driver.id,
            request_id = %request.id,
            ride_id = %ride_id,
            "ride request accepted"
        );
        self.reply(
            from,
            ServerMessage::RideRequestAccepted {
                request_id: request.id.clone(),
                ride_id,
            },
        );
        self.announce(&event);
        self.withdraw_request(&request, CancelReason::Matched, Some(&driver.id));
        Ok(())
    }

    /// Subscribe a connection, backing out if it was replaced or removed
    /// meanwhile.
    pub(super) fn join_channel(&self, ride_id: &RideId, handle: &Connection) -> bool {
        self.channels.subscribe(ride_id, handle);
        if self.connections.is_current(handle) {
            true
        } else {
            self.channels.unsubscribe(ride_id, handle.id());
            false
        }
    }

    fn subscribe_to_ride(&self, from: &Connection, ride_id: RideId) -> Result<(), DispatchError> {
        let ride = self
            .rides
            .snapshot(&ride_id)
            .ok_or_else(|| DispatchError::UnknownRide(ride_id.clone()))?;
        if !ride.is_party(from.participant_id()) {
            return Err(DispatchError::NotOnRide(ride_id));
        }

        self.join_channel(&ride_id, from);
        debug!(participant = %from.participant_id(), ride_id = %ride_id, "subscribed to ride");
        self.reply(from, ServerMessage::SubscribedToRide { ride_id });
        Ok(())
    }

    fn unsubscribe_from_ride(
        &self,
        from: &Connection,
        ride_id: RideId,
    ) -> Result<(), DispatchError> {
        self.channels.unsubscribe(&ride_id, from.id());
        self.reply(from, ServerMessage::UnsubscribedFromRide { ride_id });
        Ok(())
    }

    fn update_ride_status(
        &self,
        from: &Connection,
        ride_id: RideId,
        change: StatusChange,
        reason: Option<String>,
    ) -> Result<(), DispatchError> {
        let cell = self
            .rides
            .get(&ride_id)
            .ok_or_else(|| DispatchError::UnknownRide(ride_id.clone()))?;
        let event = lock(&cell).apply(change, from.participant(), reason, Utc::now())?;

        if event.kind == RideEventKind::RideAccepted {
            self.rides.record_assignment(&ride_id, from.participant_id());
        }
        self.record(&event);

        info!(
            participant = %from.participant_id(),
            ride_id = %ride_id,
            event = event.kind.as_str(),
            status = event.status.as_str(),
            "ride status updated"
        );
        self.reply(
            from,
            ServerMessage::RideStatusUpdated {
                ride_id,
                status: event.status,
                event: event.kind,
            },
        );
        self.announce(&event);
        Ok(())
    }

    fn record(&self, event: &RideEvent) {
        if let Err(e) = self.journal.record(event) {
            error!(ride_id = %event.ride_id, error = %e, "failed to journal ride event");
        }
    }

    /// Publish an applied transition on the ride's channel and notify the
    /// rider directly.
    fn announce(&self, event: &RideEvent) {
        self.publish(&event.ride_id, &ServerMessage::ride_event(event));
        self.deliver(&event.rider_id, ServerMessage::rider_notification(event));
    }

    // ---- out-of-band operations ----

    /// Open a ride in `PENDING`, optionally with a driver already assigned.
    pub fn open_ride(&self, new: NewRide) -> Result<Ride, DispatchError> {
        let mut ride = Ride::new(
            new.ride_id.unwrap_or_else(RideId::generate),
            new.rider_id,
            Utc::now(),
        );
        ride.driver_id = new.driver_id;
        ride.pickup = new.pickup;
        ride.dropoff = new.dropoff;
        ride.estimated_fare = new.estimated_fare;

        let snapshot = ride.clone();
        if !self.rides.insert(ride) {
            return Err(DispatchError::DuplicateRide(snapshot.id));
        }
        if let Some(driver) = &snapshot.driver_id {
            self.rides.record_assignment(&snapshot.id, driver);
        }
        info!(ride_id = %snapshot.id, rider = %snapshot.rider_id, "ride opened");
        Ok(snapshot)
    }

    /// Assign a driver to a pending ride.
    pub fn assign_driver(
        &self,
        ride_id: &RideId,
        driver: ParticipantId,
    ) -> Result<Ride, DispatchError> {
        let cell = self
            .rides
            .get(ride_id)
            .ok_or_else(|| DispatchError::UnknownRide(ride_id.clone()))?;
        let snapshot = {
            let mut ride = lock(&cell);
            ride.assign_driver(driver.clone())?;
            ride.clone()
        };
        self.rides.record_assignment(ride_id, &driver);
        info!(ride_id = %ride_id, driver = %driver, "driver assigned");
        Ok(snapshot)
    }

    pub fn ride(&self, ride_id: &RideId) -> Option<Ride> {
        self.rides.snapshot(ride_id)
    }

    /// Fresh drivers near a point. `radius_km` is clamped like a ride
    /// request's.
    pub fn nearby_drivers(&self, center: &Coordinate, radius_km: Option<f64>) -> Vec<NearbyDriver> {
        self.locations.nearby(center, self.config.radius_for(radius_km))
    }

    /// Reclaim stale locations and long-finished rides.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let report = SweepReport {
            locations: self.locations.prune_stale(now),
            rides: self
                .rides
                .prune_finished(now - self.config.ride_retention()),
        };
        if report != SweepReport::default() {
            debug!(
                locations = report.locations,
                rides = report.rides,
                "swept stale state"
            );
        }
        report
    }
}
