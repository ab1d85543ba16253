//! Consumer selection policy.
//!
//! Shared queues round-robin pending references over attached consumers with
//! remaining credit; exclusive queues hold a single active-consumer slot that
//! is reassigned under the queue lock when the active consumer detaches.
//! Selection never blocks: a consumer without credit is skipped until an
//! acknowledgment frees capacity.

use tracing::debug;

use crate::config::RoutingMode;

use super::consumer::{ConsumerId, ConsumerState};

/// Policy state owned by the queue and mutated only under its lock.
pub(crate) struct DispatchState {
    mode: RoutingMode,
    /// Round-robin cursor into the attachment order (shared mode).
    cursor: usize,
    /// The single consumer receiving new deliveries (exclusive mode).
    active: Option<ConsumerId>,
}

impl DispatchState {
    pub(crate) fn new(mode: RoutingMode) -> Self {
        Self {
            mode,
            cursor: 0,
            active: None,
        }
    }

    /// The active consumer of an exclusive queue, if one is designated.
    pub(crate) fn active_consumer(&self) -> Option<ConsumerId> { self.active }

    /// Claim the active slot for a newly attached consumer when vacant.
    pub(crate) fn on_attach(&mut self, id: ConsumerId) {
        if self.mode == RoutingMode::Exclusive && self.active.is_none() {
            self.active = Some(id);
            debug!(consumer = %id, "exclusive consumer designated");
        }
    }

    /// Release the active slot if `id` held it and hand it to the next
    /// attached consumer, if any. A single write under the queue lock; no
    /// instant exists at which two consumers hold the slot.
    pub(crate) fn on_detach(&mut self, id: ConsumerId, remaining: &[ConsumerState]) {
        if self.mode == RoutingMode::Exclusive && self.active == Some(id) {
            self.active = remaining.first().map(|consumer| consumer.id);
            match self.active {
                Some(next) => debug!(consumer = %next, "exclusive consumer reassigned"),
                None => debug!("exclusive queue left without a consumer"),
            }
        }
        if self.cursor >= remaining.len() {
            self.cursor = 0;
        }
    }

    /// Pick the consumer to receive the next pending reference.
    ///
    /// Returns an index into `consumers`, or `None` when no eligible consumer
    /// has credit. Shared mode scans from the round-robin cursor and advances
    /// it past the selection; exclusive mode only ever selects the active
    /// consumer.
    pub(crate) fn select(&mut self, consumers: &[ConsumerState]) -> Option<usize> {
        match self.mode {
            RoutingMode::Exclusive => {
                let active = self.active?;
                consumers
                    .iter()
                    .position(|consumer| consumer.id == active)
                    .filter(|&index| consumers[index].has_credit())
            }
            RoutingMode::Shared => {
                if consumers.is_empty() {
                    return None;
                }
                let len = consumers.len();
                let start = self.cursor;
                let found = (0..len)
                    .map(|offset| (start + offset) % len)
                    .find(|&index| consumers[index].has_credit());
                if let Some(index) = found {
                    self.cursor = (index + 1) % len;
                }
                found
            }
        }
    }
}
