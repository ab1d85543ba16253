//! Glue between the transport layer and the queues.
//!
//! [`QueueRegistry`] routes by address: it backs dead-letter transfers and
//! lets the broker core look queues up by name. [`QueueLifecycleBridge`] is
//! the provided [`ConnectionLifecycleListener`] that maps terminal
//! connection events onto [`Queue::disconnect_connection`] for every
//! registered queue, which is what turns a dead socket into redelivery of
//! the consumer's in-flight references.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::info;
use tracing::warn;

use crate::{
    delivery::DeadLetterSink,
    error::{ListenerError, TransportError},
    message::Message,
    queue::Queue,
    session::ConnectionId,
    transport::ConnectionLifecycleListener,
};

/// Named queues, shared across the broker core.
#[derive(Default)]
pub struct QueueRegistry(DashMap<String, Arc<Queue>>);

impl QueueRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a queue under its own name.
    pub fn register(&self, queue: Arc<Queue>) {
        info!("queue registered: {}", queue.name());
        self.0.insert(queue.name().to_owned(), queue);
    }

    /// Look a queue up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.0.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a queue by name.
    pub fn deregister(&self, name: &str) { self.0.remove(name); }

    /// Number of registered queues.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether no queues are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    fn for_each_queue(&self, mut apply: impl FnMut(&Arc<Queue>)) {
        for entry in &self.0 {
            apply(entry.value());
        }
    }
}

impl DeadLetterSink for QueueRegistry {
    /// Route an exhausted message to the queue registered under `address`.
    ///
    /// An unknown address discards the message with a warning; dead-letter
    /// routing must never fail the queue that initiated it.
    fn dead_letter(&self, address: &str, message: Arc<Message>) {
        match self.get(address) {
            Some(target) => {
                target.enqueue(message);
            }
            None => {
                warn!(
                    %address,
                    message = %message.id(),
                    "dead-letter address not registered; message discarded"
                );
            }
        }
    }
}

/// Lifecycle listener that fails consumers of dead connections.
///
/// Both terminal events mean the same thing to delivery: every consumer the
/// connection owned is detached and its in-flight references become
/// redelivery candidates.
pub struct QueueLifecycleBridge {
    queues: Arc<QueueRegistry>,
}

impl QueueLifecycleBridge {
    /// Bridge lifecycle events onto the queues in `registry`.
    #[must_use]
    pub fn new(queues: Arc<QueueRegistry>) -> Self { Self { queues } }
}

#[async_trait]
impl ConnectionLifecycleListener for QueueLifecycleBridge {
    fn connection_ready_for_writes(&self, _id: ConnectionId, _writable: bool) {
        // Flow control towards the socket is the outer broker's concern.
    }

    async fn connection_destroyed(&self, id: ConnectionId) -> Result<(), ListenerError> {
        self.queues
            .for_each_queue(|queue| queue.disconnect_connection(id));
        Ok(())
    }

    async fn connection_exception(
        &self,
        id: ConnectionId,
        error: TransportError,
    ) -> Result<(), ListenerError> {
        tracing::debug!(connection = %id, %error, "failing consumers for errored connection");
        self.queues
            .for_each_queue(|queue| queue.disconnect_connection(id));
        Ok(())
    }
}
