//! Queues: ordered pending references, a delivering set, and dispatch.
//!
//! A [`Queue`] owns the per-message delivery state machine. References wait
//! in a pending collection ordered by enqueue sequence, move to the
//! delivering set when handed to a consumer, and leave the queue on
//! acknowledgment, dead-letter transfer, or explicit drop. All state is
//! mutated under one `std::sync::Mutex` scoped to the queue; dead-letter
//! transfers and delayed-redispatch timers run after the lock is released so
//! a queue never locks another queue (or the timer wheel) while holding its
//! own lock.

mod consumer;
mod dispatch;

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, Weak},
};

pub use consumer::{ConsumerId, Delivery, DeliveryReceiver};
use consumer::{ConsumerState, Offer};
use dispatch::DispatchState;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, warn};

use crate::{
    config::{QueueSettings, RoutingMode},
    delivery::{self, DeadLetterSink, RedeliveryVerdict},
    error::{AckOutcome, DeliveryOutcome},
    message::{Message, MessageReference},
    metrics,
    session::ConnectionId,
};

/// Side effects collected under the queue lock and performed after release.
#[derive(Default)]
struct Effects {
    dead_letters: Vec<(String, Arc<Message>)>,
    retry_at: Option<Instant>,
}

impl Effects {
    fn note_retry(&mut self, at: Instant) {
        self.retry_at = Some(self.retry_at.map_or(at, |existing| existing.min(at)));
    }
}

struct QueueState {
    pending: BTreeMap<u64, MessageReference>,
    delivering: BTreeMap<u64, MessageReference>,
    consumers: Vec<ConsumerState>,
    dispatch: DispatchState,
    next_sequence: u64,
    next_consumer: u64,
    /// Deadline of the currently scheduled redispatch timer, if any.
    retry_scheduled: Option<Instant>,
}

/// A single queue with its consumers and delivery bookkeeping.
///
/// Constructed with [`Queue::new`], which returns an [`Arc`] so consumers,
/// bridges, and redispatch timers can share it.
pub struct Queue {
    name: String,
    settings: QueueSettings,
    dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
    state: Mutex<QueueState>,
    weak: Weak<Queue>,
}

impl Queue {
    /// Create a queue with the given settings and no dead-letter sink.
    ///
    /// With `dead_letter_address` set in the settings but no sink installed,
    /// exhausted references are dropped with an error record.
    #[must_use]
    pub fn new(name: impl Into<String>, settings: QueueSettings) -> Arc<Self> {
        Self::with_dead_letter_sink_opt(name, settings, None)
    }

    /// Create a queue that hands exhausted messages to `sink`.
    #[must_use]
    pub fn with_dead_letter_sink(
        name: impl Into<String>,
        settings: QueueSettings,
        sink: Arc<dyn DeadLetterSink>,
    ) -> Arc<Self> {
        Self::with_dead_letter_sink_opt(name, settings, Some(sink))
    }

    fn with_dead_letter_sink_opt(
        name: impl Into<String>,
        settings: QueueSettings,
        sink: Option<Arc<dyn DeadLetterSink>>,
    ) -> Arc<Self> {
        let routing = settings.routing;
        Arc::new_cyclic(|weak| Self {
            name: name.into(),
            settings,
            dead_letter_sink: sink,
            state: Mutex::new(QueueState {
                pending: BTreeMap::new(),
                delivering: BTreeMap::new(),
                consumers: Vec::new(),
                dispatch: DispatchState::new(routing),
                next_sequence: 0,
                next_consumer: 0,
                retry_scheduled: None,
            }),
            weak: weak.clone(),
        })
    }

    /// Queue name, used as the dead-letter routing key by sinks.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// The settings this queue was created with.
    #[must_use]
    pub fn settings(&self) -> &QueueSettings { &self.settings }

    /// Route a message into the queue, returning its queue-local sequence.
    pub fn enqueue(&self, message: Arc<Message>) -> u64 {
        let mut effects = Effects::default();
        let sequence = {
            let mut state = self.lock_state();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state
                .pending
                .insert(sequence, MessageReference::new(message, sequence));
            self.dispatch_locked(&mut state, &mut effects);
            sequence
        };
        self.finish(effects);
        sequence
    }

    /// Attach a consumer for `connection` with the given prefetch credit.
    ///
    /// Returns the consumer's identity and the receiving end of its delivery
    /// channel. Dropping the receiver detaches the consumer the next time the
    /// queue touches it; [`Queue::detach`] does so eagerly.
    pub fn attach(&self, connection: ConnectionId, prefetch: u32) -> (ConsumerId, DeliveryReceiver) {
        let capacity = prefetch.max(1) as usize;
        let (tx, rx) = mpsc::channel(capacity);
        let mut effects = Effects::default();
        let id = {
            let mut state = self.lock_state();
            let id = ConsumerId(state.next_consumer);
            state.next_consumer += 1;
            state
                .consumers
                .push(ConsumerState::new(id, connection, prefetch.max(1), tx));
            state.dispatch.on_attach(id);
            debug!(queue = %self.name, consumer = %id, %connection, "consumer attached");
            self.dispatch_locked(&mut state, &mut effects);
            id
        };
        self.finish(effects);
        (id, rx)
    }

    /// Detach one consumer, returning its delivering references through the
    /// redelivery-candidate path in original sequence order.
    pub fn detach(&self, consumer: ConsumerId) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            self.detach_locked(&mut state, consumer, &mut effects);
            self.dispatch_locked(&mut state, &mut effects);
        }
        self.finish(effects);
    }

    /// Detach every consumer attached via `connection`.
    ///
    /// This is the cancellation path for a dead connection: its delivering
    /// references become redelivery candidates and, on an exclusive queue,
    /// the active-consumer slot transfers before dispatch resumes.
    pub fn disconnect_connection(&self, connection: ConnectionId) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            loop {
                let Some(id) = state
                    .consumers
                    .iter()
                    .find(|consumer| consumer.connection == connection)
                    .map(|consumer| consumer.id)
                else {
                    break;
                };
                self.detach_locked(&mut state, id, &mut effects);
            }
            self.dispatch_locked(&mut state, &mut effects);
        }
        self.finish(effects);
    }

    /// Acknowledge one delivered reference, removing it permanently.
    ///
    /// Idempotent: acknowledging a sequence that is no longer delivering is a
    /// benign duplicate reported as [`AckOutcome::Duplicate`].
    pub fn acknowledge(&self, sequence: u64) -> AckOutcome {
        let mut effects = Effects::default();
        let outcome = {
            let mut state = self.lock_state();
            let outcome = self.acknowledge_locked(&mut state, sequence);
            self.dispatch_locked(&mut state, &mut effects);
            outcome
        };
        self.finish(effects);
        outcome
    }

    /// Remove every reference in `sequences`, all under one lock acquisition.
    ///
    /// References the disconnect cleanup already returned to pending are
    /// still removed: a session's accumulated work is independent of
    /// transport state. Returns the number of references actually removed;
    /// the remainder were benign duplicates.
    pub fn apply_commit(&self, sequences: &[u64]) -> usize {
        let mut effects = Effects::default();
        let removed = {
            let mut state = self.lock_state();
            let mut removed = 0;
            for &sequence in sequences {
                match self.acknowledge_locked(&mut state, sequence) {
                    AckOutcome::Removed => removed += 1,
                    AckOutcome::Duplicate => {
                        if state.pending.remove(&sequence).is_some() {
                            removed += 1;
                        }
                    }
                }
            }
            self.dispatch_locked(&mut state, &mut effects);
            removed
        };
        self.finish(effects);
        removed
    }

    /// Route every delivering reference in `sequences` through the
    /// redelivery-candidate path, all under one lock acquisition.
    ///
    /// Sequences no longer delivering (for example, already returned to
    /// pending by a disconnect) are skipped as benign duplicates.
    pub fn apply_rollback(&self, sequences: &[u64]) {
        let mut ordered: Vec<u64> = sequences.to_vec();
        ordered.sort_unstable();
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            for sequence in ordered {
                if let Some(mut reference) = state.delivering.remove(&sequence) {
                    if let Some(holder) = reference.holder() {
                        debug!(queue = %self.name, %sequence, consumer = %holder, "rollback");
                    }
                    reference.set_holder(None);
                    self.redelivery_candidate_locked(&mut state, reference, &mut effects);
                }
            }
            self.dispatch_locked(&mut state, &mut effects);
        }
        self.finish(effects);
    }

    /// References awaiting dispatch.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.lock_state().pending.len() }

    /// References handed to consumers and not yet acknowledged.
    #[must_use]
    pub fn delivering_count(&self) -> usize { self.lock_state().delivering.len() }

    /// Total references still owned by the queue.
    #[must_use]
    pub fn message_count(&self) -> usize {
        let state = self.lock_state();
        state.pending.len() + state.delivering.len()
    }

    /// Attached consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize { self.lock_state().consumers.len() }

    /// The designated consumer of an exclusive queue, if any.
    #[must_use]
    pub fn active_consumer(&self) -> Option<ConsumerId> {
        self.lock_state().dispatch.active_consumer()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn acknowledge_locked(&self, state: &mut QueueState, sequence: u64) -> AckOutcome {
        match state.delivering.remove(&sequence) {
            Some(reference) => {
                if let Some(holder) = reference.holder()
                    && let Some(consumer) = state
                        .consumers
                        .iter_mut()
                        .find(|consumer| consumer.id == holder)
                {
                    consumer.restore_credit();
                }
                AckOutcome::Removed
            }
            None => {
                debug!(queue = %self.name, %sequence, "duplicate acknowledgment ignored");
                AckOutcome::Duplicate
            }
        }
    }

    fn detach_locked(&self, state: &mut QueueState, consumer: ConsumerId, effects: &mut Effects) {
        let Some(index) = state.consumers.iter().position(|c| c.id == consumer) else {
            return;
        };
        state.consumers.remove(index);
        state.dispatch.on_detach(consumer, &state.consumers);
        debug!(queue = %self.name, consumer = %consumer, "consumer detached");

        let held: Vec<u64> = state
            .delivering
            .iter()
            .filter(|(_, reference)| reference.holder() == Some(consumer))
            .map(|(&sequence, _)| sequence)
            .collect();
        for sequence in held {
            if let Some(mut reference) = state.delivering.remove(&sequence) {
                reference.set_holder(None);
                self.redelivery_candidate_locked(state, reference, effects);
            }
        }

        if self.settings.routing == RoutingMode::Exclusive
            && state.consumers.is_empty()
            && !state.pending.is_empty()
        {
            warn!(
                queue = %self.name,
                pending = state.pending.len(),
                "exclusive queue has pending references and no consumer; awaiting attach"
            );
        }
    }

    /// Decide the fate of a reference leaving delivering without an ack.
    fn redelivery_candidate_locked(
        &self,
        state: &mut QueueState,
        mut reference: MessageReference,
        effects: &mut Effects,
    ) -> DeliveryOutcome {
        let count = reference.increment_delivery_count();
        match delivery::assess(&self.settings, count, Instant::now()) {
            RedeliveryVerdict::Requeue { ready_at } => {
                reference.set_ready_at(ready_at);
                state.pending.insert(reference.sequence(), reference);
                metrics::inc_redeliveries();
                DeliveryOutcome::Requeued
            }
            RedeliveryVerdict::DeadLetter { address } => {
                if self.dead_letter_sink.is_some() {
                    debug!(
                        queue = %self.name,
                        sequence = reference.sequence(),
                        %address,
                        delivery_count = count,
                        "delivery attempts exhausted; dead-lettering"
                    );
                    effects
                        .dead_letters
                        .push((address, Arc::clone(reference.message())));
                    metrics::inc_dead_letters();
                    DeliveryOutcome::DeadLettered
                } else {
                    error!(
                        queue = %self.name,
                        sequence = reference.sequence(),
                        %address,
                        "dead-letter address configured but no sink installed; dropping"
                    );
                    metrics::inc_dropped();
                    DeliveryOutcome::Dropped
                }
            }
            RedeliveryVerdict::Drop => {
                warn!(
                    queue = %self.name,
                    sequence = reference.sequence(),
                    delivery_count = count,
                    "delivery attempts exhausted with no dead-letter address; dropping"
                );
                metrics::inc_dropped();
                DeliveryOutcome::Dropped
            }
        }
    }

    /// Hand ready pending references to consumers until credit or references
    /// run out. Never blocks; a delayed head reference halts dispatch (order
    /// preservation beats throughput) and schedules a redispatch timer.
    fn dispatch_locked(&self, state: &mut QueueState, effects: &mut Effects) {
        let now = Instant::now();
        loop {
            let Some((&sequence, head)) = state.pending.first_key_value() else {
                break;
            };
            if !head.is_ready(now) {
                if let Some(at) = head.ready_at() {
                    effects.note_retry(at);
                }
                break;
            }
            let Some(index) = state.dispatch.select(&state.consumers) else {
                break;
            };
            let consumer = &mut state.consumers[index];
            let delivery = Delivery {
                consumer: consumer.id,
                sequence,
                delivery_count: head.delivery_count(),
                message: Arc::clone(head.message()),
            };
            match consumer.offer(delivery) {
                Offer::Accepted => {
                    let holder = consumer.id;
                    let mut reference = state
                        .pending
                        .remove(&sequence)
                        .unwrap_or_else(|| unreachable!("head reference vanished under lock"));
                    reference.set_holder(Some(holder));
                    reference.set_ready_at(None);
                    state.delivering.insert(sequence, reference);
                    metrics::inc_deliveries();
                }
                Offer::Busy => break,
                Offer::Gone => {
                    // The receiver is gone: discard the decision and retire
                    // the dead consumer before continuing.
                    let gone = consumer.id;
                    self.detach_locked(state, gone, effects);
                }
            }
        }
        self.sweep_closed_consumers(state, effects);
    }

    /// Retire consumers whose delivery channel closed without an explicit
    /// detach, so their held references become redelivery candidates.
    fn sweep_closed_consumers(&self, state: &mut QueueState, effects: &mut Effects) {
        loop {
            let Some(id) = state
                .consumers
                .iter()
                .find(|consumer| consumer.is_closed())
                .map(|consumer| consumer.id)
            else {
                break;
            };
            self.detach_locked(state, id, effects);
        }
    }

    /// Perform effects collected under the lock: dead-letter transfers and
    /// the delayed-redispatch timer.
    fn finish(&self, effects: Effects) {
        for (address, message) in effects.dead_letters {
            if let Some(sink) = &self.dead_letter_sink {
                sink.dead_letter(&address, message);
            }
        }
        if let Some(at) = effects.retry_at {
            self.schedule_redispatch(at);
        }
    }

    fn schedule_redispatch(&self, at: Instant) {
        {
            let mut state = self.lock_state();
            if state.retry_scheduled.is_some_and(|existing| existing <= at) {
                return;
            }
            state.retry_scheduled = Some(at);
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime on this thread; the next queue operation redispatches.
            self.lock_state().retry_scheduled = None;
            return;
        };
        let Some(queue) = self.weak.upgrade() else {
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep_until(at).await;
            queue.lock_state().retry_scheduled = None;
            let mut effects = Effects::default();
            {
                let mut state = queue.lock_state();
                queue.dispatch_locked(&mut state, &mut effects);
            }
            queue.finish(effects);
        });
    }
}

impl DeadLetterSink for Queue {
    /// Accept an exhausted message as a brand-new reference; its delivery
    /// count restarts at zero here.
    fn dead_letter(&self, _address: &str, message: Arc<Message>) { self.enqueue(message); }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("pending", &state.pending.len())
            .field("delivering", &state.delivering.len())
            .field("consumers", &state.consumers.len())
            .finish_non_exhaustive()
    }
}
