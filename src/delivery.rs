//! Redelivery and dead-letter policy.
//!
//! When a reference leaves the delivering state without a successful
//! acknowledgment the queue routes it through [`assess`], which decides
//! between returning it to pending, moving the underlying message to the
//! configured dead-letter address, or dropping it outright. The decision is a
//! pure function of the queue settings and the reference's new delivery
//! count, so the queue can apply it while holding its lock.

use std::sync::Arc;

use tokio::time::Instant;

use crate::{config::QueueSettings, message::Message};

/// Destination a message is moved to after exhausting its attempts.
///
/// Implemented by [`crate::bridge::QueueRegistry`] (routing by address to
/// another queue) and by [`crate::queue::Queue`] directly for single-target
/// setups. The message arrives as a new message: its delivery count restarts
/// at zero on the target.
pub trait DeadLetterSink: Send + Sync {
    /// Accept a message that exhausted its delivery attempts.
    fn dead_letter(&self, address: &str, message: Arc<Message>);
}

/// Decision for one redelivery candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedeliveryVerdict {
    /// Return the reference to pending, eligible again at `ready_at` (or
    /// immediately when `None`).
    Requeue {
        /// Instant the reference becomes dispatchable, when delayed.
        ready_at: Option<Instant>,
    },
    /// Move the underlying message to the named dead-letter address and
    /// remove the reference from the queue.
    DeadLetter {
        /// Configured dead-letter address.
        address: String,
    },
    /// No dead-letter address is configured; discard the reference rather
    /// than retrying forever.
    Drop,
}

/// Decide the fate of a reference whose delivery count has just been
/// incremented to `delivery_count`.
///
/// The threshold comparison is strictly greater-than: a message is allowed
/// exactly `max_delivery_attempts` completed attempts before exhausting, so a
/// threshold of 2 dead-letters on the third attempt. An absent threshold
/// means the reference is requeued forever.
#[must_use]
pub fn assess(settings: &QueueSettings, delivery_count: u32, now: Instant) -> RedeliveryVerdict {
    let exhausted = settings
        .max_delivery_attempts
        .is_some_and(|max| delivery_count > max);
    if !exhausted {
        return RedeliveryVerdict::Requeue {
            ready_at: settings.redelivery_delay.map(|delay| now + delay),
        };
    }
    match &settings.dead_letter_address {
        Some(address) => RedeliveryVerdict::DeadLetter {
            address: address.clone(),
        },
        None => RedeliveryVerdict::Drop,
    }
}
