//! Participant → live connection mapping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::domain::{Participant, ParticipantId};

/// Process-unique identifier of one transport connection.
///
/// A participant that reconnects gets a new `ConnectionId`, which is how
/// traffic for an orphaned connection is told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a connection: a cloneable sender into the writer task.
pub type Outbox<M> = mpsc::UnboundedSender<M>;

/// A participant's outbound channel, tagged with its connection id.
pub struct ConnectionHandle<M> {
    id: ConnectionId,
    participant: Participant,
    outbox: Outbox<M>,
}

// Manual impl: `M` itself need not be `Clone` for the handle to be.
impl<M> Clone for ConnectionHandle<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            participant: self.participant.clone(),
            outbox: self.outbox.clone(),
        }
    }
}

impl<M> fmt::Debug for ConnectionHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("participant", &self.participant.id)
            .field("role", &self.participant.role)
            .finish()
    }
}

impl<M> PartialEq for ConnectionHandle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<M> Eq for ConnectionHandle<M> {}

impl<M> ConnectionHandle<M> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant.id
    }

    /// Queue a message. Fails only once the receiving side is gone.
    pub fn send(&self, message: M) -> Result<(), Undeliverable> {
        self.outbox.send(message).map_err(|_| Undeliverable {
            connection: self.id,
        })
    }
}

/// The receiving side of a connection has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection {connection} is closed")]
pub struct Undeliverable {
    pub connection: ConnectionId,
}

/// Outcome of a targeted send.
#[derive(Debug)]
pub enum Delivery<M> {
    Delivered,
    /// Nobody is connected under that id.
    UnknownRecipient,
    /// The registered connection is dead; the caller should disconnect it.
    Failed(ConnectionHandle<M>),
}

/// Registry of live connections, at most one per participant.
///
/// Last writer wins: registering a participant again replaces (and
/// returns) the previous handle. Removal is keyed by connection id so that
/// a late cleanup from an orphaned connection cannot evict its successor.
///
/// Sends never happen while a map shard is locked; handles are cloned
/// out first.
pub struct ConnectionRegistry<M> {
    connections: DashMap<ParticipantId, ConnectionHandle<M>>,
    next_id: AtomicU64,
}

impl<M> Default for ConnectionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ConnectionRegistry<M> {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a handle with a fresh connection id. Does not register it.
    pub fn handle(&self, participant: Participant, outbox: Outbox<M>) -> ConnectionHandle<M> {
        ConnectionHandle {
            id: ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            participant,
            outbox,
        }
    }

    /// Register `handle`, returning the handle it replaced, if any.
    pub fn connect(&self, handle: ConnectionHandle<M>) -> Option<ConnectionHandle<M>> {
        let key = handle.participant.id.clone();
        let id = handle.id;
        self.connections
            .insert(key, handle)
            .filter(|previous| previous.id != id)
    }

    /// Remove `handle` if it is still the registered connection.
    ///
    /// Returns `true` exactly once per registered handle; later calls and
    /// calls for a replaced handle return `false`.
    pub fn disconnect(&self, handle: &ConnectionHandle<M>) -> bool {
        self.connections
            .remove_if(&handle.participant.id, |_, current| current.id == handle.id)
            .is_some()
    }

    /// The live handle for a participant.
    pub fn get(&self, id: &ParticipantId) -> Option<ConnectionHandle<M>> {
        self.connections.get(id).map(|h| h.value().clone())
    }

    /// Whether `handle` is the participant's registered connection.
    pub fn is_current(&self, handle: &ConnectionHandle<M>) -> bool {
        self.connections
            .get(&handle.participant.id)
            .is_some_and(|current| current.id == handle.id)
    }

    pub fn is_connected(&self, id: &ParticipantId) -> bool {
        self.connections.contains_key(id)
    }

    /// Best-effort delivery to one participant.
    pub fn send(&self, id: &ParticipantId, message: M) -> Delivery<M> {
        let Some(handle) = self.get(id) else {
            return Delivery::UnknownRecipient;
        };
        match handle.send(message) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Failed(handle),
        }
    }

    /// Snapshot of every registered handle.
    pub fn handles(&self) -> Vec<ConnectionHandle<M>> {
        self.connections.iter().map(|h| h.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<M: Clone> ConnectionRegistry<M> {
    /// Deliver to every registered connection.
    ///
    /// One dead recipient never stops delivery to the rest; the dead
    /// handles are returned for cleanup.
    pub fn broadcast_all(&self, message: &M) -> Vec<ConnectionHandle<M>> {
        self.handles()
            .into_iter()
            .filter(|handle| handle.send(message.clone()).is_err())
            .collect()
    }
}
