//! Web layer for the dispatch server.
//!
//! Serves the WebSocket message protocol plus a few HTTP endpoints for the
//! booking service and operators.

mod dto;
mod identity;
mod routes;
mod socket;
mod state;

pub use dto::*;
pub use identity::{AdmissionError, ConnectQuery, IdentityProvider, TrustedQueryIdentity};
pub use routes::{AppError, create_router};
pub use socket::run_connection;
pub use state::AppState;
