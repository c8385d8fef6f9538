//! Ride requests: a rider asking to be picked up.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::BlankId;
use super::geo::Coordinate;
use super::participant::ParticipantId;

/// Identifier of a ride request.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Wrap a request id echoed back by a client. Returns `None` for blank
    /// input.
    pub fn new(s: impl AsRef<str>) -> Option<Self> {
        let s = s.as_ref().trim();
        (!s.is_empty()).then(|| RequestId(Arc::from(s)))
    }

    pub fn generate() -> Self {
        RequestId(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RequestId {
    type Error = BlankId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RequestId::new(s).ok_or(BlankId("request"))
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0.to_string()
    }
}

/// A location with an optional human-readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Place {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            address: None,
        }
    }
}

/// A live ride request.
#[derive(Debug, Clone, PartialEq)]
pub struct RideRequest {
    pub id: RequestId,
    pub rider_id: ParticipantId,
    pub pickup: Place,
    pub dropoff: Place,
    pub estimated_fare: f64,
    pub radius_km: f64,
    pub created_at: DateTime<Utc>,
    /// Drivers that have been shown this request.
    pub notified: HashSet<ParticipantId>,
}

impl RideRequest {
    pub fn new(
        rider_id: ParticipantId,
        pickup: Place,
        dropoff: Place,
        estimated_fare: f64,
        radius_km: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            rider_id,
            pickup,
            dropoff,
            estimated_fare,
            radius_km,
            created_at,
            notified: HashSet::new(),
        }
    }

    /// Expired requests stay stored but are no longer matched.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }

    /// Distance from a point to the pickup, in kilometres.
    pub fn distance_to_pickup(&self, from: &Coordinate) -> f64 {
        from.distance_km(&self.pickup.coordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(lat: f64, lon: f64) -> Place {
        Place::new(Coordinate::new(lat, lon).unwrap())
    }

    #[test]
    fn expiry_is_strictly_after_ttl() {
        let created = Utc::now();
        let req = RideRequest::new(
            ParticipantId::new("r1").unwrap(),
            place(31.52, 74.33),
            place(31.55, 74.35),
            12.5,
            5.0,
            created,
        );
        let ttl = Duration::minutes(5);
        assert!(!req.is_expired(created, ttl));
        assert!(!req.is_expired(created + ttl, ttl));
        assert!(req.is_expired(created + ttl + Duration::seconds(1), ttl));
    }

    #[test]
    fn place_wire_format() {
        let p: Place =
            serde_json::from_str(r#"{"lat": 31.52, "lng": 74.33, "address": "Mall Road"}"#)
                .unwrap();
        assert_eq!(p.address.as_deref(), Some("Mall Road"));
        assert_eq!(p.coordinate.latitude(), 31.52);

        let json = serde_json::to_value(place(1.0, 2.0)).unwrap();
        assert_eq!(json, serde_json::json!({"latitude": 1.0, "longitude": 2.0}));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn blank_request_ids_are_rejected() {
        let id: RequestId = serde_json::from_str(r#""req-1""#).unwrap();
        assert_eq!(id.as_str(), "req-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""req-1""#);

        let err = serde_json::from_str::<RequestId>(r#""  ""#).unwrap_err();
        assert!(err.to_string().contains("request id must not be blank"), "{err}");
        assert!(RequestId::new("").is_none());
    }
}
