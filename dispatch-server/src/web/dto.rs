//! Data transfer objects for HTTP requests and responses.

use serde::{Deserialize, Serialize};

use crate::domain::{ParticipantId, Place, RideId};
use crate::locations::NearbyDriver;

/// Query for drivers around a point.
#[derive(Debug, Deserialize)]
pub struct NearbyDriversQuery {
    pub lat: f64,

    pub lng: f64,

    /// Search radius in kilometres (defaults to 5)
    pub radius_km: Option<f64>,
}

/// A driver in nearby results.
#[derive(Debug, Serialize)]
pub struct NearbyDriverResult {
    /// Driver's participant id
    pub id: ParticipantId,

    pub lat: f64,

    pub lng: f64,

    /// Distance from the query point in kilometres, two decimals
    pub distance: f64,
}

#[derive(Debug, Serialize)]
pub struct NearbyDriversResponse {
    pub drivers: Vec<NearbyDriverResult>,
}

/// Request to open a ride out-of-band.
#[derive(Debug, Deserialize)]
pub struct OpenRideRequest {
    /// Ride id issued by the booking service; generated when absent
    pub ride_id: Option<RideId>,

    pub rider_id: ParticipantId,

    /// Driver to pre-assign
    pub driver_id: Option<ParticipantId>,

    pub pickup: Option<Place>,

    pub dropoff: Option<Place>,

    pub estimated_fare: Option<f64>,
}

/// Request to assign a driver to a pending ride.
#[derive(Debug, Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: ParticipantId,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

impl From<NearbyDriver> for NearbyDriverResult {
    fn from(driver: NearbyDriver) -> Self {
        Self {
            id: driver.driver_id,
            lat: driver.coordinate.latitude(),
            lng: driver.coordinate.longitude(),
            distance: crate::dispatch::round_km(driver.distance_km),
        }
    }
}
