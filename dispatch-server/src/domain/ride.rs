//! Ride records and the ride lifecycle state machine.
//!
//! ```text
//! PENDING ──accept──> ACCEPTED ──start──> IN_PROGRESS ──complete──> COMPLETED
//!    │                 │   ↺ driver_arrived    │
//!    └──────cancel─────┴──────────cancel───────┴──────> CANCELLED
//! ```
//!
//! Every transition goes through [`Ride::apply`], which checks both the
//! table above and who is allowed to ask for it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{BlankId, TransitionError};
use super::participant::{Participant, ParticipantId};
use super::request::Place;

/// Identifier of a ride. Opaque; generated ids are UUIDv4 strings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RideId(Arc<str>);

impl RideId {
    /// Wrap an externally issued ride id. Returns `None` for blank input.
    pub fn new(s: impl AsRef<str>) -> Option<Self> {
        let s = s.as_ref().trim();
        (!s.is_empty()).then(|| RideId(Arc::from(s)))
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        RideId(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RideId({})", self.0)
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RideId {
    type Error = BlankId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RideId::new(s).ok_or(BlankId("ride"))
    }
}

impl From<RideId> for String {
    fn from(id: RideId) -> Self {
        id.0.to_string()
    }
}

/// Lifecycle status of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled rides accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// The transition table.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;
        match (self, next) {
            (Pending, Accepted) | (Accepted, InProgress) | (InProgress, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status change requested by a participant.
///
/// `DriverArrived` is a sub-event of `ACCEPTED`: it is recorded and
/// announced but leaves the status unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChange {
    #[serde(alias = "ACCEPTED")]
    Accepted,
    #[serde(alias = "DRIVER_ARRIVED")]
    DriverArrived,
    #[serde(alias = "IN_PROGRESS")]
    InProgress,
    #[serde(alias = "COMPLETED")]
    Completed,
    #[serde(alias = "CANCELLED")]
    Cancelled,
}

impl StatusChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusChange::Accepted => "accepted",
            StatusChange::DriverArrived => "driver_arrived",
            StatusChange::InProgress => "in_progress",
            StatusChange::Completed => "completed",
            StatusChange::Cancelled => "cancelled",
        }
    }

    /// The status this change moves to, or `None` for a sub-event.
    pub fn target(&self) -> Option<RideStatus> {
        match self {
            StatusChange::Accepted => Some(RideStatus::Accepted),
            StatusChange::DriverArrived => None,
            StatusChange::InProgress => Some(RideStatus::InProgress),
            StatusChange::Completed => Some(RideStatus::Completed),
            StatusChange::Cancelled => Some(RideStatus::Cancelled),
        }
    }

    fn event_kind(&self) -> RideEventKind {
        match self {
            StatusChange::Accepted => RideEventKind::RideAccepted,
            StatusChange::DriverArrived => RideEventKind::DriverArrived,
            StatusChange::InProgress => RideEventKind::RideStarted,
            StatusChange::Completed => RideEventKind::RideCompleted,
            StatusChange::Cancelled => RideEventKind::RideCancelled,
        }
    }
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a ride, as announced on its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideEventKind {
    RideAccepted,
    DriverArrived,
    RideStarted,
    RideCompleted,
    RideCancelled,
}

impl RideEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideEventKind::RideAccepted => "ride_accepted",
            RideEventKind::DriverArrived => "driver_arrived",
            RideEventKind::RideStarted => "ride_started",
            RideEventKind::RideCompleted => "ride_completed",
            RideEventKind::RideCancelled => "ride_cancelled",
        }
    }

    /// Human-readable line for the rider notification.
    pub fn rider_message(&self) -> &'static str {
        match self {
            RideEventKind::RideAccepted => "A driver has accepted your ride",
            RideEventKind::DriverArrived => "Your driver has arrived",
            RideEventKind::RideStarted => "Your ride has started",
            RideEventKind::RideCompleted => "Your ride is complete",
            RideEventKind::RideCancelled => "Your ride was cancelled",
        }
    }
}

/// A transition that has been applied to a ride.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideEvent {
    pub ride_id: RideId,
    pub kind: RideEventKind,
    pub status: RideStatus,
    pub rider_id: ParticipantId,
    pub driver_id: Option<ParticipantId>,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// In-memory view of a ride.
///
/// Durable ride records belong to the persistence layer; this copy exists
/// so transitions can be checked and serialized without a round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ride {
    pub id: RideId,
    pub rider_id: ParticipantId,
    pub driver_id: Option<ParticipantId>,
    pub status: RideStatus,
    pub pickup: Option<Place>,
    pub dropoff: Option<Place>,
    pub estimated_fare: Option<f64>,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub driver_arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Ride {
    /// Create a pending ride for a rider.
    pub fn new(id: RideId, rider_id: ParticipantId, requested_at: DateTime<Utc>) -> Self {
        Self {
            id,
            rider_id,
            driver_id: None,
            status: RideStatus::Pending,
            pickup: None,
            dropoff: None,
            estimated_fare: None,
            requested_at,
            accepted_at: None,
            driver_arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    /// Whether `id` is the rider or the assigned driver.
    pub fn is_party(&self, id: &ParticipantId) -> bool {
        &self.rider_id == id || self.driver_id.as_ref() == Some(id)
    }

    /// Assign a driver while the ride is still pending.
    pub fn assign_driver(&mut self, driver: ParticipantId) -> Result<(), TransitionError> {
        if self.status != RideStatus::Pending {
            return Err(TransitionError::NotPending {
                ride_id: self.id.clone(),
                current: self.status,
            });
        }
        match &self.driver_id {
            Some(existing) if existing != &driver => Err(TransitionError::AlreadyAssigned {
                ride_id: self.id.clone(),
            }),
            _ => {
                self.driver_id = Some(driver);
                Ok(())
            }
        }
    }

    /// Apply a requested change on behalf of `actor`.
    ///
    /// The status check runs before the permission check, so a driver who
    /// loses a race to accept sees the state that beat them. On failure the
    /// ride is left untouched.
    pub fn apply(
        &mut self,
        change: StatusChange,
        actor: &Participant,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RideEvent, TransitionError> {
        match change.target() {
            Some(next) => {
                if !self.status.can_transition_to(next) {
                    return Err(self.illegal(change));
                }
            }
            None => {
                if self.status != RideStatus::Accepted {
                    return Err(self.illegal(change));
                }
                if self.driver_arrived_at.is_some() {
                    return Err(TransitionError::AlreadyArrived {
                        ride_id: self.id.clone(),
                    });
                }
            }
        }
        self.authorize(change, actor)?;

        match change {
            StatusChange::Accepted => {
                self.driver_id = Some(actor.id.clone());
                self.accepted_at = Some(now);
            }
            StatusChange::DriverArrived => self.driver_arrived_at = Some(now),
            StatusChange::InProgress => self.started_at = Some(now),
            StatusChange::Completed => self.completed_at = Some(now),
            StatusChange::Cancelled => {
                self.cancelled_at = Some(now);
                self.cancellation_reason = reason.clone();
            }
        }
        if let Some(next) = change.target() {
            self.status = next;
        }

        Ok(RideEvent {
            ride_id: self.id.clone(),
            kind: change.event_kind(),
            status: self.status,
            rider_id: self.rider_id.clone(),
            driver_id: self.driver_id.clone(),
            at: now,
            reason,
        })
    }

    fn authorize(&self, change: StatusChange, actor: &Participant) -> Result<(), TransitionError> {
        let is_assigned_driver = self.driver_id.as_ref() == Some(&actor.id);
        let allowed = match change {
            // An unassigned pending ride can be claimed by any driver.
            StatusChange::Accepted => {
                actor.is_driver() && (self.driver_id.is_none() || is_assigned_driver)
            }
            StatusChange::Cancelled => is_assigned_driver || self.rider_id == actor.id,
            _ => actor.is_driver() && is_assigned_driver,
        };
        if allowed {
            Ok(())
        } else {
            Err(TransitionError::NotPermitted {
                ride_id: self.id.clone(),
                requested: change,
            })
        }
    }

    fn illegal(&self, requested: StatusChange) -> TransitionError {
        TransitionError::Illegal {
            ride_id: self.id.clone(),
            current: self.status,
            requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    fn driver(s: &str) -> Participant {
        Participant::driver(pid(s))
    }

    fn rider(s: &str) -> Participant {
        Participant::rider(pid(s))
    }

    fn ride() -> Ride {
        Ride::new(RideId::new("ride-1").unwrap(), pid("r1"), Utc::now())
    }

    #[test]
    fn transition_table() {
        use RideStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Accepted.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Accepted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Accepted));
    }

    #[test]
    fn full_lifecycle() {
        let mut ride = ride();
        let d = driver("d1");
        let now = Utc::now();

        let ev = ride.apply(StatusChange::Accepted, &d, None, now).unwrap();
        assert_eq!(ev.kind, RideEventKind::RideAccepted);
        assert_eq!(ride.driver_id, Some(pid("d1")));

        let ev = ride.apply(StatusChange::DriverArrived, &d, None, now).unwrap();
        assert_eq!(ev.kind, RideEventKind::DriverArrived);
        assert_eq!(ev.status, RideStatus::Accepted);
        assert!(ride.driver_arrived_at.is_some());

        ride.apply(StatusChange::InProgress, &d, None, now).unwrap();
        let ev = ride.apply(StatusChange::Completed, &d, None, now).unwrap();
        assert_eq!(ev.status, RideStatus::Completed);
        assert!(ride.completed_at.is_some());
    }

    #[test]
    fn illegal_transition_reports_current_and_requested() {
        let mut ride = ride();
        let d = driver("d1");
        ride.assign_driver(pid("d1")).unwrap();

        let err = ride
            .apply(StatusChange::Completed, &d, None, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                ride_id: ride.id.clone(),
                current: RideStatus::Pending,
                requested: StatusChange::Completed,
            }
        );
        assert_eq!(ride.status, RideStatus::Pending);
    }

    #[test]
    fn only_assigned_driver_can_progress() {
        let mut ride = ride();
        ride.assign_driver(pid("d1")).unwrap();

        let err = ride
            .apply(StatusChange::Accepted, &driver("d2"), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));

        let err = ride
            .apply(StatusChange::Accepted, &rider("r1"), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));
    }

    #[test]
    fn either_party_can_cancel() {
        let now = Utc::now();
        let mut by_rider = ride();
        by_rider
            .apply(StatusChange::Accepted, &driver("d1"), None, now)
            .unwrap();
        let ev = by_rider
            .apply(
                StatusChange::Cancelled,
                &rider("r1"),
                Some("changed plans".into()),
                now,
            )
            .unwrap();
        assert_eq!(ev.reason.as_deref(), Some("changed plans"));
        assert_eq!(by_rider.cancellation_reason.as_deref(), Some("changed plans"));

        let mut by_driver = ride();
        by_driver
            .apply(StatusChange::Accepted, &driver("d1"), None, now)
            .unwrap();
        by_driver
            .apply(StatusChange::Cancelled, &driver("d1"), None, now)
            .unwrap();
        assert_eq!(by_driver.status, RideStatus::Cancelled);

        let err = by_driver
            .apply(StatusChange::Cancelled, &rider("r1"), None, now)
            .unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
    }

    #[test]
    fn stranger_cannot_cancel() {
        let mut ride = ride();
        let err = ride
            .apply(StatusChange::Cancelled, &rider("r2"), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));
    }

    #[test]
    fn driver_arrived_only_once_and_only_when_accepted() {
        let mut ride = ride();
        let d = driver("d1");
        ride.assign_driver(pid("d1")).unwrap();
        assert!(matches!(
            ride.apply(StatusChange::DriverArrived, &d, None, Utc::now()),
            Err(TransitionError::Illegal { .. })
        ));

        ride.apply(StatusChange::Accepted, &d, None, Utc::now()).unwrap();
        ride.apply(StatusChange::DriverArrived, &d, None, Utc::now()).unwrap();
        assert!(matches!(
            ride.apply(StatusChange::DriverArrived, &d, None, Utc::now()),
            Err(TransitionError::AlreadyArrived { .. })
        ));
    }

    #[test]
    fn assign_driver_rules() {
        let mut ride = ride();
        ride.assign_driver(pid("d1")).unwrap();
        ride.assign_driver(pid("d1")).unwrap();
        assert!(matches!(
            ride.assign_driver(pid("d2")),
            Err(TransitionError::AlreadyAssigned { .. })
        ));

        ride.apply(StatusChange::Accepted, &driver("d1"), None, Utc::now())
            .unwrap();
        assert!(matches!(
            ride.assign_driver(pid("d1")),
            Err(TransitionError::NotPending { .. })
        ));
    }

    #[test]
    fn blank_ride_ids_are_rejected() {
        let id: RideId = serde_json::from_str(r#""ride-7""#).unwrap();
        assert_eq!(id, RideId::new("ride-7").unwrap());
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""ride-7""#);

        let err = serde_json::from_str::<RideId>(r#""""#).unwrap_err();
        assert!(err.to_string().contains("ride id must not be blank"), "{err}");
        assert!(serde_json::from_str::<RideId>(r#"" \t""#).is_err());
    }

    #[test]
    fn status_change_accepts_upper_case() {
        let c: StatusChange = serde_json::from_str(r#""IN_PROGRESS""#).unwrap();
        assert_eq!(c, StatusChange::InProgress);
        let c: StatusChange = serde_json::from_str(r#""driver_arrived""#).unwrap();
        assert_eq!(c, StatusChange::DriverArrived);
        assert!(serde_json::from_str::<StatusChange>(r#""pending""#).is_err());
    }
}
