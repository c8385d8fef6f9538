//! Connection admission.
//!
//! Authentication happens elsewhere; by the time a socket reaches this
//! server its participant id and role have been vouched for. An
//! [`IdentityProvider`] turns the upgrade request into that participant.

use serde::Deserialize;

use crate::domain::{InvalidParticipantId, Participant, ParticipantId, Role};

/// Query string of a WebSocket upgrade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectQuery {
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    #[error(transparent)]
    InvalidId(#[from] InvalidParticipantId),

    #[error("missing role")]
    MissingRole,

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// Resolves the participant behind a connection attempt.
pub trait IdentityProvider: Send + Sync {
    fn admit(&self, user_id: &str, query: &ConnectQuery) -> Result<Participant, AdmissionError>;
}

/// Trusts the id from the path and the `role` query parameter.
///
/// Suitable behind a gateway that has already authenticated the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedQueryIdentity;

impl IdentityProvider for TrustedQueryIdentity {
    fn admit(&self, user_id: &str, query: &ConnectQuery) -> Result<Participant, AdmissionError> {
        let id = ParticipantId::new(user_id)?;
        let role = query.role.as_deref().ok_or(AdmissionError::MissingRole)?;
        let role = Role::parse(role).ok_or_else(|| AdmissionError::UnknownRole(role.to_string()))?;
        Ok(Participant::new(id, role))
    }
}
