//! Participant identity types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Error returned when parsing an invalid participant id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid participant id: {reason}")]
pub struct InvalidParticipantId {
    reason: &'static str,
}

/// Maximum accepted length of a participant id.
const MAX_ID_LEN: usize = 128;

/// Opaque identifier of a rider or driver.
///
/// Issued by the identity provider and trusted for the lifetime of a
/// connection. Cheap to clone: the string is shared.
///
/// # Examples
///
/// ```
/// use dispatch_server::domain::ParticipantId;
///
/// let id = ParticipantId::new("driver-42").unwrap();
/// assert_eq!(id.as_str(), "driver-42");
///
/// assert!(ParticipantId::new("").is_err());
/// assert!(ParticipantId::new("  ").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(Arc<str>);

impl ParticipantId {
    /// Create a participant id, rejecting blank or oversized values.
    pub fn new(s: impl AsRef<str>) -> Result<Self, InvalidParticipantId> {
        let s = s.as_ref();
        if s.trim().is_empty() {
            return Err(InvalidParticipantId {
                reason: "must not be empty",
            });
        }
        if s.len() > MAX_ID_LEN {
            return Err(InvalidParticipantId {
                reason: "must be at most 128 bytes",
            });
        }
        Ok(ParticipantId(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = InvalidParticipantId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ParticipantId::new(s)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the marketplace a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Rider => "rider",
            Role::Driver => "driver",
        }
    }

    /// Parse a role name, case-insensitively.
    pub fn parse(s: &str) -> Option<Role> {
        match s.to_ascii_lowercase().as_str() {
            "rider" => Some(Role::Rider),
            "driver" => Some(Role::Driver),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An admitted participant: a validated id plus its role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Participant {
    pub id: ParticipantId,
    pub role: Role,
}

impl Participant {
    pub fn new(id: ParticipantId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn rider(id: ParticipantId) -> Self {
        Self::new(id, Role::Rider)
    }

    pub fn driver(id: ParticipantId) -> Self {
        Self::new(id, Role::Driver)
    }

    pub fn is_driver(&self) -> bool {
        self.role == Role::Driver
    }

    pub fn is_rider(&self) -> bool {
        self.role == Role::Rider
    }
}
