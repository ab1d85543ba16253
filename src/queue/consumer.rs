//! Consumer attachment state and delivery hand-off.
//!
//! Each consumer attaches to exactly one queue and receives deliveries over a
//! bounded channel sized to its prefetch. Credit counts the remaining
//! unacknowledged references the consumer may hold; it is spent on dispatch
//! and restored only when one of the consumer's deliveries is acknowledged.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{message::Message, session::ConnectionId};

/// Identifier assigned to a consumer when it attaches to a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub(crate) u64);

impl ConsumerId {
    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConsumerId({})", self.0)
    }
}

/// One reference handed to a consumer.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Consumer the reference was dispatched to.
    pub consumer: ConsumerId,
    /// Queue-local sequence of the reference; acknowledge with this.
    pub sequence: u64,
    /// Completed unacknowledged attempts prior to this delivery.
    pub delivery_count: u32,
    /// The underlying message.
    pub message: Arc<Message>,
}

/// Receiving end of a consumer's delivery channel.
pub type DeliveryReceiver = mpsc::Receiver<Delivery>;

/// Result of offering a delivery to a consumer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Offer {
    /// The consumer accepted the delivery; one credit was spent.
    Accepted,
    /// The channel is momentarily full despite available credit; skip the
    /// consumer without spending credit.
    Busy,
    /// The consumer's channel is gone; the consumer must be detached and the
    /// dispatch decision discarded.
    Gone,
}

/// Per-consumer state held under the queue lock.
pub(crate) struct ConsumerState {
    pub(crate) id: ConsumerId,
    pub(crate) connection: ConnectionId,
    prefetch: u32,
    credit: u32,
    tx: mpsc::Sender<Delivery>,
}

impl ConsumerState {
    pub(crate) fn new(
        id: ConsumerId,
        connection: ConnectionId,
        prefetch: u32,
        tx: mpsc::Sender<Delivery>,
    ) -> Self {
        Self {
            id,
            connection,
            prefetch,
            credit: prefetch,
            tx,
        }
    }

    pub(crate) fn has_credit(&self) -> bool { self.credit > 0 }

    /// Hand a delivery to the consumer, spending one credit on success.
    ///
    /// The channel is sized to the prefetch, so with credit available a send
    /// only fails when the receiver was dropped.
    pub(crate) fn offer(&mut self, delivery: Delivery) -> Offer {
        debug_assert!(self.has_credit());
        match self.tx.try_send(delivery) {
            Ok(()) => {
                self.credit -= 1;
                Offer::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => Offer::Busy,
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Gone,
        }
    }

    /// Restore one credit after an acknowledgment.
    pub(crate) fn restore_credit(&mut self) {
        self.credit = (self.credit + 1).min(self.prefetch);
    }

    pub(crate) fn is_closed(&self) -> bool { self.tx.is_closed() }
}
