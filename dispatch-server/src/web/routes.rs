//! HTTP route handlers.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::dispatch::{DispatchError, NewRide};
use crate::domain::{Coordinate, Ride, RideId};

use super::dto::*;
use super::identity::AdmissionError;
use super::socket::ws_upgrade;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/:user_id", get(ws_upgrade))
        .route("/nearby-drivers", get(nearby_drivers))
        .route("/rides", post(open_ride))
        .route("/rides/:ride_id", get(get_ride))
        .route("/rides/:ride_id/assign", put(assign_driver))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Fresh drivers around a point, nearest first.
async fn nearby_drivers(
    State(state): State<AppState>,
    Query(query): Query<NearbyDriversQuery>,
) -> Result<Json<NearbyDriversResponse>, AppError> {
    let center = Coordinate::new(query.lat, query.lng).map_err(|e| AppError::BadRequest {
        message: e.to_string(),
    })?;

    let drivers = state
        .dispatcher
        .nearby_drivers(&center, query.radius_km)
        .into_iter()
        .map(NearbyDriverResult::from)
        .collect();

    Ok(Json(NearbyDriversResponse { drivers }))
}

/// Open a ride in `pending`, as the booking service does once a ride exists.
async fn open_ride(
    State(state): State<AppState>,
    Json(req): Json<OpenRideRequest>,
) -> Result<(StatusCode, Json<Ride>), AppError> {
    if let Some(fare) = req.estimated_fare {
        if !(fare >= 0.0 && fare.is_finite()) {
            return Err(AppError::BadRequest {
                message: format!("estimated_fare must be a non-negative number, got {fare}"),
            });
        }
    }

    let ride = state.dispatcher.open_ride(NewRide {
        ride_id: req.ride_id,
        rider_id: req.rider_id,
        driver_id: req.driver_id,
        pickup: req.pickup,
        dropoff: req.dropoff,
        estimated_fare: req.estimated_fare,
    })?;

    Ok((StatusCode::CREATED, Json(ride)))
}

/// Current state of a ride.
async fn get_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
) -> Result<Json<Ride>, AppError> {
    let ride_id = parse_ride_id(&ride_id)?;
    state
        .dispatcher
        .ride(&ride_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            message: format!("unknown ride: {ride_id}"),
        })
}

/// Assign a driver to a pending ride.
async fn assign_driver(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    Json(req): Json<AssignDriverRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride_id = parse_ride_id(&ride_id)?;
    let ride = state.dispatcher.assign_driver(&ride_id, req.driver_id)?;
    Ok(Json(ride))
}

fn parse_ride_id(s: &str) -> Result<RideId, AppError> {
    RideId::new(s).ok_or_else(|| AppError::BadRequest {
        message: "ride id must not be blank".to_string(),
    })
}

// Error handling

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest { message: String },
    Unauthorized { message: String },
    NotFound { message: String },
    Conflict { message: String },
    Internal { message: String },
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        let message = e.to_string();
        match e {
            DispatchError::UnknownRide(_) | DispatchError::UnknownRequest(_) => {
                AppError::NotFound { message }
            }
            DispatchError::DuplicateRide(_) | DispatchError::Transition(_) => {
                AppError::Conflict { message }
            }
            DispatchError::Internal => AppError::Internal { message },
            _ => AppError::BadRequest { message },
        }
    }
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        AppError::Unauthorized {
            message: e.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            AppError::Unauthorized { message } => (StatusCode::UNAUTHORIZED, message),
            AppError::NotFound { message } => (StatusCode::NOT_FOUND, message),
            AppError::Conflict { message } => (StatusCode::CONFLICT, message),
            AppError::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        if status.is_server_error() {
            error!(%status, %message, "request failed");
        } else {
            warn!(%status, %message, "request rejected");
        }

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
