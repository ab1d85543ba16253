//! Transaction sessions.
//!
//! A [`TransactionSession`] accumulates acknowledgments on behalf of one
//! consumer session. The broker's transaction coordinator drives the outcome:
//! [`TransactionSession::apply_commit`] removes every accumulated reference
//! and [`TransactionSession::apply_rollback`] routes them through the
//! redelivery-candidate path, each under a single queue-lock acquisition so
//! no partial outcome is ever observable.
//!
//! Accumulated work is independent of transport state: a commit that races a
//! connection failure is still honoured for references accumulated before
//! the close, even when the disconnect cleanup has already returned them to
//! pending.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::queue::{Delivery, Queue};

/// Pending acknowledgments for one session on one queue.
pub struct TransactionSession {
    queue: Arc<Queue>,
    acks: Mutex<Vec<u64>>,
}

impl TransactionSession {
    /// Start an empty session against `queue`.
    #[must_use]
    pub fn new(queue: Arc<Queue>) -> Self {
        Self {
            queue,
            acks: Mutex::new(Vec::new()),
        }
    }

    /// Accumulate an acknowledgment for a received delivery.
    ///
    /// Nothing is applied to the queue until commit or rollback.
    pub fn acknowledge(&self, delivery: &Delivery) { self.acknowledge_sequence(delivery.sequence); }

    /// Accumulate an acknowledgment by sequence.
    pub fn acknowledge_sequence(&self, sequence: u64) {
        self.lock_acks().push(sequence);
    }

    /// Number of acknowledgments accumulated and not yet applied.
    #[must_use]
    pub fn pending_acks(&self) -> usize { self.lock_acks().len() }

    /// Apply every accumulated acknowledgment atomically.
    ///
    /// Returns the number of references removed from the queue; the rest
    /// were benign duplicates. The session is left empty and reusable.
    pub fn apply_commit(&self) -> usize {
        let acks = std::mem::take(&mut *self.lock_acks());
        if acks.is_empty() {
            return 0;
        }
        let removed = self.queue.apply_commit(&acks);
        debug!(
            queue = %self.queue.name(),
            acks = acks.len(),
            removed,
            "transaction committed"
        );
        removed
    }

    /// Return every accumulated reference to the queue atomically, each with
    /// its delivery count incremented by exactly one.
    pub fn apply_rollback(&self) {
        let acks = std::mem::take(&mut *self.lock_acks());
        if acks.is_empty() {
            return;
        }
        debug!(
            queue = %self.queue.name(),
            acks = acks.len(),
            "transaction rolled back"
        );
        self.queue.apply_rollback(&acks);
    }

    fn lock_acks(&self) -> std::sync::MutexGuard<'_, Vec<u64>> {
        self.acks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
