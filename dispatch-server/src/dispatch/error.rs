//! Dispatch error taxonomy.
//!
//! Every variant is reported to the sending connection only and never
//! closes it. Delivery failures are not represented here: they are handled
//! by disconnecting the dead recipient and are invisible to the sender.

use serde::Serialize;

use crate::domain::{RequestId, RideId, TransitionError};

/// Coarse error class sent alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Authorization,
    State,
    Internal,
}

/// Errors raised while handling an inbound message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// Payload is not a JSON object with a string `type`
    #[error("{0}")]
    Malformed(String),

    /// `type` names no known message kind
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Known kind with missing or invalid fields
    #[error("invalid {kind} message: {reason}")]
    InvalidField { kind: &'static str, reason: String },

    /// Sender's role may not send this kind
    #[error("only {required}s may send {kind}")]
    WrongRole {
        kind: &'static str,
        required: &'static str,
    },

    /// Sender is neither rider nor driver of the ride
    #[error("not a participant of ride {0}")]
    NotOnRide(RideId),

    #[error("unknown ride: {0}")]
    UnknownRide(RideId),

    #[error("unknown ride request: {0}")]
    UnknownRequest(RequestId),

    #[error("no active ride request")]
    NoActiveRequest,

    #[error("ride request {0} has expired")]
    RequestExpired(RequestId),

    #[error("ride {0} already exists")]
    DuplicateRide(RideId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Unexpected failure while processing
    #[error("internal error")]
    Internal,
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Malformed(_)
            | DispatchError::UnknownType(_)
            | DispatchError::InvalidField { .. } => ErrorCode::Validation,
            DispatchError::WrongRole { .. } | DispatchError::NotOnRide(_) => {
                ErrorCode::Authorization
            }
            DispatchError::Transition(e) if e.is_authorization() => ErrorCode::Authorization,
            DispatchError::UnknownRide(_)
            | DispatchError::UnknownRequest(_)
            | DispatchError::NoActiveRequest
            | DispatchError::RequestExpired(_)
            | DispatchError::DuplicateRide(_)
            | DispatchError::Transition(_) => ErrorCode::State,
            DispatchError::Internal => ErrorCode::Internal,
        }
    }

    pub(crate) fn invalid(kind: &'static str, reason: impl ToString) -> Self {
        DispatchError::InvalidField {
            kind,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RideStatus, StatusChange};

    #[test]
    fn error_display() {
        let err = DispatchError::UnknownType("teleport".into());
        assert_eq!(err.to_string(), "Unknown message type: teleport");
        assert_eq!(err.code(), ErrorCode::Validation);

        let err = DispatchError::WrongRole {
            kind: "driver_location",
            required: "driver",
        };
        assert_eq!(err.to_string(), "only drivers may send driver_location");
        assert_eq!(err.code(), ErrorCode::Authorization);

        let err = DispatchError::invalid("ride_request", "missing field `pickup`");
        assert_eq!(
            err.to_string(),
            "invalid ride_request message: missing field `pickup`"
        );
    }

    #[test]
    fn transition_errors_keep_their_message() {
        let ride_id = RideId::new("r-7").unwrap();
        let err: DispatchError = TransitionError::Illegal {
            ride_id: ride_id.clone(),
            current: RideStatus::Completed,
            requested: StatusChange::InProgress,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::State);
        assert_eq!(
            err.to_string(),
            "ride r-7 is completed; cannot change status to in_progress"
        );

        let err: DispatchError = TransitionError::NotPermitted {
            ride_id,
            requested: StatusChange::Completed,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::Authorization);
    }
}
