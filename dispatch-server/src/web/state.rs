//! Application state for the web layer.

use std::sync::Arc;

use crate::dispatch::Dispatcher;

use super::identity::{IdentityProvider, TrustedQueryIdentity};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The dispatch engine shared by every connection
    pub dispatcher: Arc<Dispatcher>,

    /// Admission of WebSocket connections
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Create a new app state that trusts query-string identities.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::with_identity(dispatcher, TrustedQueryIdentity)
    }

    pub fn with_identity(
        dispatcher: Dispatcher,
        identity: impl IdentityProvider + 'static,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            identity: Arc::new(identity),
        }
    }
}
