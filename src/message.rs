//! Message identity and per-queue reference state.
//!
//! A [`Message`] is the routed unit: an identity plus an opaque payload. Each
//! queue that a message is routed into creates its own [`MessageReference`],
//! so fan-out across queues tracks delivery counts independently.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;

use crate::queue::ConsumerId;

/// Identity of an underlying message, assigned at routing time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl From<u64> for MessageId {
    fn from(value: u64) -> Self { Self(value) }
}

impl MessageId {
    /// Create a new [`MessageId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// An immutable routed message.
///
/// Payload bytes are opaque to the delivery core; no wire format is assumed.
/// Shared behind an [`Arc`] so fan-out routing never copies the payload.
#[derive(Clone, Debug)]
pub struct Message {
    id: MessageId,
    payload: Bytes,
}

impl Message {
    /// Create a message from an identity and an opaque payload.
    #[must_use]
    pub fn new(id: MessageId, payload: Bytes) -> Self { Self { id, payload } }

    /// Identity of the message.
    #[must_use]
    pub fn id(&self) -> MessageId { self.id }

    /// Opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }
}

/// A message as seen by one queue.
///
/// The reference owns the queue-local bookkeeping: the enqueue sequence that
/// fixes its position relative to other pending references, the count of
/// completed unacknowledged delivery attempts, the consumer currently holding
/// it (if any), and the instant it becomes eligible for redispatch when a
/// redelivery delay is configured.
#[derive(Clone, Debug)]
pub struct MessageReference {
    message: Arc<Message>,
    sequence: u64,
    delivery_count: u32,
    holder: Option<ConsumerId>,
    ready_at: Option<Instant>,
}

impl MessageReference {
    /// Create a fresh reference at the given queue-local sequence.
    #[must_use]
    pub fn new(message: Arc<Message>, sequence: u64) -> Self {
        Self {
            message,
            sequence,
            delivery_count: 0,
            holder: None,
            ready_at: None,
        }
    }

    /// The underlying message.
    #[must_use]
    pub fn message(&self) -> &Arc<Message> { &self.message }

    /// Queue-local enqueue sequence; preserved across redeliveries.
    #[must_use]
    pub fn sequence(&self) -> u64 { self.sequence }

    /// Completed unacknowledged delivery attempts.
    #[must_use]
    pub fn delivery_count(&self) -> u32 { self.delivery_count }

    /// Consumer currently holding the reference, if it is being delivered.
    #[must_use]
    pub fn holder(&self) -> Option<ConsumerId> { self.holder }

    /// Instant the reference becomes dispatchable again, if delayed.
    #[must_use]
    pub fn ready_at(&self) -> Option<Instant> { self.ready_at }

    /// Whether the reference is eligible for dispatch at `now`.
    #[must_use]
    pub fn is_ready(&self, now: Instant) -> bool {
        self.ready_at.is_none_or(|at| at <= now)
    }

    pub(crate) fn set_holder(&mut self, holder: Option<ConsumerId>) { self.holder = holder; }

    pub(crate) fn increment_delivery_count(&mut self) -> u32 {
        self.delivery_count += 1;
        self.delivery_count
    }

    pub(crate) fn set_ready_at(&mut self, at: Option<Instant>) { self.ready_at = at; }
}
