//! Registry of tracked connections.
//!
//! The transport channel registers every connection that goes active in a
//! shared [`ConnectionRegistry`], the delivery core's equivalent of a channel
//! group. The registry records liveness and writability only; per-connection
//! delivery state lives with the queues.

use dashmap::DashMap;

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

#[derive(Debug)]
struct TrackedConnection {
    writable: bool,
}

/// Concurrent registry of live connections keyed by [`ConnectionId`].
///
/// Mutated only by the transport channel: insertion on `on_active`, removal
/// when the connection reaches its terminal inactive state, writability
/// updates from the I/O task.
#[derive(Default)]
pub struct ConnectionRegistry(DashMap<ConnectionId, TrackedConnection>);

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Track a connection that has just gone active. Connections start
    /// writable until the transport reports otherwise.
    pub fn insert(&self, id: ConnectionId) {
        self.0.insert(id, TrackedConnection { writable: true });
    }

    /// Stop tracking a connection, typically on its inactive transition.
    pub fn remove(&self, id: ConnectionId) { self.0.remove(&id); }

    /// Whether the connection is currently tracked as live.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool { self.0.contains_key(&id) }

    /// Record a writability change reported by the transport.
    pub fn set_writable(&self, id: ConnectionId, writable: bool) {
        if let Some(mut entry) = self.0.get_mut(&id) {
            entry.writable = writable;
        }
    }

    /// Whether the connection is currently writable. Untracked connections
    /// report `false`.
    #[must_use]
    pub fn is_writable(&self, id: ConnectionId) -> bool {
        self.0.get(&id).is_some_and(|entry| entry.writable)
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// IDs of every tracked connection.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.0.iter().map(|entry| *entry.key()).collect()
    }
}
