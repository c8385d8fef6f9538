//! JSON message protocol.
//!
//! Every message is a JSON object with a string `type`. Inbound messages
//! are validated here, at the boundary: once a [`ClientMessage`] exists,
//! its coordinates, headings, speeds and fares are known to be in range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    Coordinate, ParticipantId, Place, RequestId, RideEvent, RideEventKind, RideId, RideStatus,
    StatusChange,
};
use crate::locations::{LocationRecord, PositionUpdate};

use super::error::{DispatchError, ErrorCode};

/// Inbound message kinds, as they appear in `type`.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "driver_location",
    "subscribe_to_rides",
    "unsubscribe_from_rides",
    "ride_request",
    "cancel_ride_request",
    "accept_ride_request",
    "subscribe_to_ride",
    "unsubscribe_from_ride",
    "update_ride_status",
];

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    DriverLocation(PositionUpdate),
    SubscribeToRides,
    UnsubscribeFromRides,
    RideRequest(NewRideRequest),
    CancelRideRequest {
        #[serde(default)]
        request_id: Option<RequestId>,
    },
    AcceptRideRequest {
        request_id: RequestId,
    },
    SubscribeToRide {
        ride_id: RideId,
    },
    UnsubscribeFromRide {
        ride_id: RideId,
    },
    UpdateRideStatus {
        ride_id: RideId,
        status: StatusChange,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ClientMessage {
    /// Parse and validate one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, DispatchError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| DispatchError::Malformed(format!("invalid JSON: {e}")))?;

        let Some(kind) = value.get("type") else {
            return Err(DispatchError::Malformed(
                "message must be a JSON object with a `type` field".to_string(),
            ));
        };
        let Some(kind) = kind.as_str() else {
            return Err(DispatchError::Malformed(
                "`type` must be a string".to_string(),
            ));
        };
        let Some(kind) = CLIENT_MESSAGE_TYPES.iter().copied().find(|k| *k == kind) else {
            return Err(DispatchError::UnknownType(kind.to_string()));
        };

        serde_json::from_value(value).map_err(|e| DispatchError::invalid(kind, e))
    }

    /// The wire name of this message's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::DriverLocation(_) => "driver_location",
            ClientMessage::SubscribeToRides => "subscribe_to_rides",
            ClientMessage::UnsubscribeFromRides => "unsubscribe_from_rides",
            ClientMessage::RideRequest(_) => "ride_request",
            ClientMessage::CancelRideRequest { .. } => "cancel_ride_request",
            ClientMessage::AcceptRideRequest { .. } => "accept_ride_request",
            ClientMessage::SubscribeToRide { .. } => "subscribe_to_ride",
            ClientMessage::UnsubscribeFromRide { .. } => "unsubscribe_from_ride",
            ClientMessage::UpdateRideStatus { .. } => "update_ride_status",
        }
    }
}

#[derive(Deserialize)]
struct RawPosition {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    longitude: f64,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
}

impl TryFrom<RawPosition> for PositionUpdate {
    type Error = String;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        let coordinate = Coordinate::new(raw.latitude, raw.longitude).map_err(|e| e.to_string())?;
        if let Some(h) = raw.heading {
            if !(0.0..=360.0).contains(&h) {
                return Err(format!("heading must be within 0..=360, got {h}"));
            }
        }
        if let Some(s) = raw.speed {
            if !(s >= 0.0 && s.is_finite()) {
                return Err(format!("speed must be a non-negative number, got {s}"));
            }
        }
        Ok(PositionUpdate {
            coordinate,
            heading: raw.heading,
            speed: raw.speed,
        })
    }
}

impl<'de> Deserialize<'de> for PositionUpdate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawPosition::deserialize(deserializer)?;
        PositionUpdate::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// A rider's request to be picked up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawRideRequest")]
pub struct NewRideRequest {
    pub pickup: Place,
    pub dropoff: Place,
    pub estimated_fare: f64,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
struct RawRideRequest {
    pickup: Place,
    dropoff: Place,
    #[serde(alias = "estimated_price")]
    estimated_fare: f64,
    #[serde(default)]
    radius_km: Option<f64>,
}

impl TryFrom<RawRideRequest> for NewRideRequest {
    type Error = String;

    fn try_from(raw: RawRideRequest) -> Result<Self, Self::Error> {
        if !(raw.estimated_fare >= 0.0 && raw.estimated_fare.is_finite()) {
            return Err(format!(
                "estimated_fare must be a non-negative number, got {}",
                raw.estimated_fare
            ));
        }
        if let Some(r) = raw.radius_km {
            if !(r > 0.0 && r.is_finite()) {
                return Err(format!("radius_km must be positive, got {r}"));
            }
        }
        Ok(NewRideRequest {
            pickup: raw.pickup,
            dropoff: raw.dropoff,
            estimated_fare: raw.estimated_fare,
            radius_km: raw.radius_km,
        })
    }
}

/// Why a ride request went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The rider cancelled it
    RiderCancelled,
    /// The rider issued a newer request
    Replaced,
    /// Another driver accepted it
    Matched,
    /// The rider's connection closed
    RiderDisconnected,
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Error {
        code: ErrorCode,
        message: String,
    },
    LocationUpdated {
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    },
    SubscribedToRides,
    UnsubscribedFromRides,
    /// A ride request offered to a driver.
    RideRequest {
        request_id: RequestId,
        rider_id: ParticipantId,
        pickup: Place,
        dropoff: Place,
        estimated_fare: f64,
        distance_to_pickup: f64,
        created_at: DateTime<Utc>,
    },
    /// How many drivers a new request was offered to.
    NearbyDrivers {
        request_id: RequestId,
        count: usize,
        radius_km: f64,
    },
    RideRequestCancelled {
        request_id: RequestId,
        reason: CancelReason,
    },
    RideRequestAccepted {
        request_id: RequestId,
        ride_id: RideId,
    },
    SubscribedToRide {
        ride_id: RideId,
    },
    UnsubscribedFromRide {
        ride_id: RideId,
    },
    RideStatusUpdated {
        ride_id: RideId,
        status: RideStatus,
        event: RideEventKind,
    },
    /// Published on a ride's channel for each applied transition.
    RideEvent {
        event: RideEventKind,
        ride_id: RideId,
        status: RideStatus,
        rider_id: ParticipantId,
        driver_id: Option<ParticipantId>,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Sent straight to the rider for each applied transition.
    RideNotification {
        ride_id: RideId,
        event: RideEventKind,
        message: String,
    },
    /// The assigned driver's position, published on the ride's channel.
    DriverPosition {
        ride_id: RideId,
        driver_id: ParticipantId,
        latitude: f64,
        longitude: f64,
        heading: Option<f64>,
        speed: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    /// Fleet snapshot, only sent when fleet broadcasting is enabled.
    DriverLocations {
        drivers: Vec<LocationRecord>,
    },
    /// This connection was superseded by a newer one for the same participant.
    SessionReplaced,
}

impl ServerMessage {
    pub fn error(err: &DispatchError) -> Self {
        ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn ride_event(event: &RideEvent) -> Self {
        ServerMessage::RideEvent {
            event: event.kind,
            ride_id: event.ride_id.clone(),
            status: event.status,
            rider_id: event.rider_id.clone(),
            driver_id: event.driver_id.clone(),
            timestamp: event.at,
            reason: event.reason.clone(),
        }
    }

    pub fn rider_notification(event: &RideEvent) -> Self {
        ServerMessage::RideNotification {
            ride_id: event.ride_id.clone(),
            event: event.kind,
            message: event.kind.rider_message().to_string(),
        }
    }

    pub fn driver_position(ride_id: &RideId, record: &LocationRecord) -> Self {
        ServerMessage::DriverPosition {
            ride_id: ride_id.clone(),
            driver_id: record.driver_id.clone(),
            latitude: record.coordinate.latitude(),
            longitude: record.coordinate.longitude(),
            heading: record.heading,
            speed: record.speed,
            timestamp: record.updated_at,
        }
    }

    /// The wire name of this message's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Error { .. } => "error",
            ServerMessage::LocationUpdated { .. } => "location_updated",
            ServerMessage::SubscribedToRides => "subscribed_to_rides",
            ServerMessage::UnsubscribedFromRides => "unsubscribed_from_rides",
            ServerMessage::RideRequest { .. } => "ride_request",
            ServerMessage::NearbyDrivers { .. } => "nearby_drivers",
            ServerMessage::RideRequestCancelled { .. } => "ride_request_cancelled",
            ServerMessage::RideRequestAccepted { .. } => "ride_request_accepted",
            ServerMessage::SubscribedToRide { .. } => "subscribed_to_ride",
            ServerMessage::UnsubscribedFromRide { .. } => "unsubscribed_from_ride",
            ServerMessage::RideStatusUpdated { .. } => "ride_status_updated",
            ServerMessage::RideEvent { .. } => "ride_event",
            ServerMessage::RideNotification { .. } => "ride_notification",
            ServerMessage::DriverPosition { .. } => "driver_position",
            ServerMessage::DriverLocations { .. } => "driver_locations",
            ServerMessage::SessionReplaced => "session_replaced",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Round a distance to two decimals for display.
pub fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_driver_location() {
        let msg = ClientMessage::parse(
            r#"{"type":"driver_location","latitude":31.52,"longitude":74.33,"heading":90,"speed":8.5}"#,
        )
        .unwrap();
        let ClientMessage::DriverLocation(update) = msg else {
            panic!("wrong variant: {msg:?}");
        };
        assert_eq!(update.coordinate, Coordinate::new(31.52, 74.33).unwrap());
        assert_eq!(update.heading, Some(90.0));
        assert_eq!(update.speed, Some(8.5));

        let msg = ClientMessage::parse(r#"{"type":"driver_location","lat":1,"lng":2}"#).unwrap();
        assert_eq!(msg.kind(), "driver_location");
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let err = ClientMessage::parse(r#"{"type":"driver_location","lat":95,"lng":2}"#)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Validation);
        assert!(err.to_string().starts_with("invalid driver_location message"));

        let err =
            ClientMessage::parse(r#"{"type":"driver_location","lat":1,"lng":2,"heading":400}"#)
                .unwrap_err();
        assert!(err.to_string().contains("heading"), "{err}");

        let err = ClientMessage::parse(r#"{"type":"driver_location","lat":1,"lng":2,"speed":-3}"#)
            .unwrap_err();
        assert!(err.to_string().contains("speed"), "{err}");
    }

    #[test]
    fn unknown_type_message() {
        let err = ClientMessage::parse(r#"{"type":"teleport"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Unknown message type: teleport");
    }

    #[test]
    fn malformed_payloads() {
        for bad in ["not json", "[1,2]", r#"{"kind":"x"}"#, r#"{"type":7}"#] {
            let err = ClientMessage::parse(bad).unwrap_err();
            assert!(
                matches!(err, DispatchError::Malformed(_)),
                "{bad}: got {err:?}"
            );
        }
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let err = ClientMessage::parse(r#"{"type":"subscribe_to_ride"}"#).unwrap_err();
        assert!(err.to_string().contains("ride_id"), "{err}");

        let err = ClientMessage::parse(
            r#"{"type":"update_ride_status","ride_id":"r1","status":"flying"}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Validation);
    }

    #[test]
    fn parse_ride_request() {
        let msg = ClientMessage::parse(
            &json!({
                "type": "ride_request",
                "pickup": {"lat": 31.52, "lng": 74.33, "address": "Liberty Market"},
                "dropoff": {"lat": 31.47, "lng": 74.41},
                "estimated_fare": 450.0
            })
            .to_string(),
        )
        .unwrap();
        let ClientMessage::RideRequest(req) = msg else {
            panic!("wrong variant");
        };
        assert_eq!(req.pickup.address.as_deref(), Some("Liberty Market"));
        assert_eq!(req.dropoff.coordinate.latitude(), 31.47);
        assert_eq!(req.radius_km, None);

        let err = ClientMessage::parse(
            &json!({
                "type": "ride_request",
                "pickup": {"lat": 31.52, "lng": 74.33},
                "dropoff": {"lat": 31.47, "lng": 74.41},
                "estimated_fare": -1.0
            })
            .to_string(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("estimated_fare"), "{err}");
    }

    #[test]
    fn parse_status_update_and_unit_kinds() {
        let msg = ClientMessage::parse(
            r#"{"type":"update_ride_status","ride_id":"r1","status":"IN_PROGRESS"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::UpdateRideStatus {
                ride_id: RideId::new("r1").unwrap(),
                status: StatusChange::InProgress,
                reason: None,
            }
        );

        let msg = ClientMessage::parse(r#"{"type":"subscribe_to_rides"}"#).unwrap();
        assert_eq!(msg, ClientMessage::SubscribeToRides);

        let msg = ClientMessage::parse(r#"{"type":"cancel_ride_request"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CancelRideRequest { request_id: None });
    }

    #[test]
    fn server_message_wire_shape() {
        let err = DispatchError::UnknownType("x".into());
        assert_eq!(
            serde_json::to_value(ServerMessage::error(&err)).unwrap(),
            json!({"type": "error", "code": "validation", "message": "Unknown message type: x"})
        );

        assert_eq!(
            serde_json::to_value(ServerMessage::UnsubscribedFromRides).unwrap(),
            json!({"type": "unsubscribed_from_rides"})
        );

        let ride_id = RideId::new("r1").unwrap();
        let value = serde_json::to_value(ServerMessage::RideStatusUpdated {
            ride_id,
            status: RideStatus::InProgress,
            event: RideEventKind::RideStarted,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "ride_status_updated",
                "ride_id": "r1",
                "status": "in_progress",
                "event": "ride_started"
            })
        );
    }

    #[test]
    fn kind_matches_serialized_type() {
        let msg = ServerMessage::SessionReplaced;
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.kind());
    }

    #[test]
    fn rounding() {
        assert_eq!(round_km(0.1461), 0.15);
        assert_eq!(round_km(2.0), 2.0);
    }
}
