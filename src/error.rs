//! Canonical error and outcome types for the crate.
//!
//! Failures that callers must handle are errors; policy decisions that merely
//! look like failures (a message exhausting its delivery attempts, a duplicate
//! acknowledgment) are modelled as outcome enums so they cannot be confused
//! with faults.

use thiserror::Error;

use crate::{
    session::ConnectionId,
    transport::{MAX_EVENT_CAPACITY, MAX_WORKERS},
};

/// Network-level failure observed on a live connection.
///
/// Produced by the transport channel when the peer misbehaves or the socket
/// errors while the connection is still marked active. Errors raised after the
/// connection has gone inactive are discarded at the transport boundary and
/// never surface as a `TransportError`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The underlying transport reported an exception.
    #[error("transport exception on {connection}: {cause}")]
    Exception {
        /// Connection the exception was observed on.
        connection: ConnectionId,
        /// Underlying cause as reported by the I/O layer.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The buffer handler rejected an inbound frame.
    #[error("frame handler failed on {connection}: {cause}")]
    Handler {
        /// Connection the frame arrived on.
        connection: ConnectionId,
        /// Error returned by the [`crate::transport::BufferHandler`].
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Failure inside an external [`crate::transport::ConnectionLifecycleListener`].
///
/// Listener failures are logged and swallowed by the dispatcher; they must
/// never propagate back into the transport.
#[derive(Debug, Error)]
#[error("lifecycle listener failed: {0}")]
pub struct ListenerError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl ListenerError {
    /// Wrap an arbitrary error raised by a lifecycle listener.
    pub fn new<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(cause))
    }

    /// Wrap a plain message raised by a lifecycle listener.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self { Self(message.into().into()) }
}

/// Errors returned when building the lifecycle dispatcher.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The event queue capacity was zero or exceeded the supported maximum.
    #[error("invalid event capacity {0}; must be between 1 and {MAX_EVENT_CAPACITY}")]
    InvalidCapacity(usize),
    /// The worker count was zero or exceeded the supported maximum.
    #[error("invalid worker count {0}; must be between 1 and {MAX_WORKERS}")]
    InvalidWorkers(usize),
}

/// Outcome of routing a reference through the redelivery-candidate path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The reference returned to the pending collection for another attempt.
    Requeued,
    /// Delivery attempts were exhausted and the message moved to the
    /// configured dead-letter address.
    DeadLettered,
    /// Delivery attempts were exhausted with no dead-letter address
    /// configured; the reference was discarded.
    Dropped,
}

/// Outcome of acknowledging a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// The reference was removed from the queue and credit restored.
    Removed,
    /// The reference was already removed; the duplicate is benign and has no
    /// observable effect.
    Duplicate,
}

/// Result type alias used throughout the transport layer.
pub type Result<T> = std::result::Result<T, TransportError>;
