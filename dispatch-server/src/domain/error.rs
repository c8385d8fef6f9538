//! Domain error types.
//!
//! These errors describe ride transitions that were refused. They are
//! distinct from protocol and delivery errors, which live in the dispatch
//! layer.

use super::ride::{RideId, RideStatus, StatusChange};

/// Why a ride transition or assignment was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The transition table does not allow this change from the current status
    #[error("ride {ride_id} is {current}; cannot change status to {requested}")]
    Illegal {
        ride_id: RideId,
        current: RideStatus,
        requested: StatusChange,
    },

    /// The participant is not allowed to request this change
    #[error("not permitted to mark ride {ride_id} as {requested}")]
    NotPermitted {
        ride_id: RideId,
        requested: StatusChange,
    },

    /// Driver arrival was already recorded
    #[error("driver arrival already recorded for ride {ride_id}")]
    AlreadyArrived { ride_id: RideId },

    /// A different driver is already assigned
    #[error("ride {ride_id} already has a driver assigned")]
    AlreadyAssigned { ride_id: RideId },

    /// Drivers can only be assigned to pending rides
    #[error("ride {ride_id} is {current}; drivers can only be assigned while pending")]
    NotPending { ride_id: RideId, current: RideStatus },
}

/// A ride or request id that is empty or only whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} id must not be blank")]
pub struct BlankId(pub(crate) &'static str);

impl TransitionError {
    /// Whether the refusal is about who asked rather than when.
    pub fn is_authorization(&self) -> bool {
        matches!(self, TransitionError::NotPermitted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let ride_id = RideId::new("r-1").unwrap();

        let err = TransitionError::Illegal {
            ride_id: ride_id.clone(),
            current: RideStatus::Completed,
            requested: StatusChange::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "ride r-1 is completed; cannot change status to in_progress"
        );

        let err = TransitionError::NotPermitted {
            ride_id: ride_id.clone(),
            requested: StatusChange::Accepted,
        };
        assert_eq!(err.to_string(), "not permitted to mark ride r-1 as accepted");
        assert!(err.is_authorization());

        let err = TransitionError::NotPending {
            ride_id,
            current: RideStatus::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "ride r-1 is in_progress; drivers can only be assigned while pending"
        );
        assert!(!err.is_authorization());
    }
}
