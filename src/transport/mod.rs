//! Per-connection frame and lifecycle handling.
//!
//! [`FrameTransportChannel`] is the adapter between an I/O layer that
//! produces decoded frames and the broker core. It registers connections in
//! the shared [`ConnectionRegistry`], forwards frames to the
//! [`BufferHandler`], and turns close/error races into exactly one terminal
//! lifecycle notification per connection.

mod listener;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
pub use listener::{
    BufferHandler,
    ConnectionLifecycleListener,
    LifecycleDispatcher,
    LifecycleDispatcherBuilder,
    LifecycleEvent,
    LifecycleHandle,
    MAX_EVENT_CAPACITY,
    MAX_WORKERS,
};
use tracing::{debug, error, trace};

use crate::{
    error::{Result, TransportError},
    metrics,
    session::{ConnectionId, ConnectionRegistry},
};

/// Per-connection transport adapter.
///
/// The connection's state machine is `created → active → {writable ⇄
/// not-writable} → inactive`, with `inactive` terminal: once a channel has
/// delivered its destroyed or exception notification, every later lifecycle
/// callback is a no-op. The active flag is flipped with a compare-and-swap so
/// a concurrent close and transport error resolve to exactly one of the two
/// notifications, never both and never two of either.
pub struct FrameTransportChannel<H> {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<H>,
    listener: Arc<dyn ConnectionLifecycleListener>,
    events: LifecycleHandle,
    active: AtomicBool,
}

impl<H: BufferHandler> FrameTransportChannel<H> {
    /// Create a channel for one connection.
    ///
    /// `listener` receives writability changes synchronously; destroyed and
    /// exception notifications go through `events` onto the dispatcher's
    /// worker pool.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<H>,
        listener: Arc<dyn ConnectionLifecycleListener>,
        events: LifecycleHandle,
    ) -> Self {
        Self {
            id,
            registry,
            handler,
            listener,
            events,
            active: AtomicBool::new(false),
        }
    }

    /// Identity of the connection this channel serves.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId { self.id }

    /// Whether the connection is active (registered and not yet closed).
    #[must_use]
    pub fn is_active(&self) -> bool { self.active.load(Ordering::SeqCst) }

    /// The connection went active: track it in the shared registry.
    ///
    /// Side effect only; never fails the caller. Repeated calls are no-ops.
    pub fn on_active(&self) {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.registry.insert(self.id);
            metrics::inc_connections();
            debug!(connection = %self.id, "connection active");
        }
    }

    /// Forward a writability change to the listener, synchronously on the
    /// I/O task. No blocking work is permitted here.
    pub fn on_writability_changed(&self, writable: bool) {
        if !self.is_active() {
            return;
        }
        self.registry.set_writable(self.id, writable);
        self.listener.connection_ready_for_writes(self.id, writable);
    }

    /// Hand one decoded frame to the buffer handler.
    ///
    /// The buffer's storage is released when this call returns, whether or
    /// not the handler succeeded. The handler runs synchronously with
    /// respect to this call and must not block on network I/O.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Handler`] when the handler rejects the
    /// frame.
    pub fn on_frame_received(&self, buffer: Bytes) -> Result<()> {
        let result = self.handler.buffer_received(self.id, &buffer);
        // Last owner: dropping here releases the storage even on failure.
        drop(buffer);
        metrics::inc_frames();
        result.map_err(|cause| {
            metrics::inc_errors();
            TransportError::Handler {
                connection: self.id,
                cause,
            }
        })
    }

    /// Mark the end of one read cycle, after zero or more frames.
    pub fn on_read_batch_complete(&self) {
        trace!(connection = %self.id, "read batch complete");
        self.handler.end_of_batch(self.id);
    }

    /// The connection closed.
    ///
    /// The winner of the active-flag race fires `connection_destroyed`
    /// exactly once, on the dispatcher's worker pool rather than the I/O
    /// task; a later duplicate close is a no-op.
    pub fn on_inactive(&self) {
        if !self.deactivate() {
            return;
        }
        debug!(connection = %self.id, "connection destroyed");
        if let Err(event) = self.events.dispatch(LifecycleEvent::Destroyed(self.id)) {
            metrics::inc_errors();
            error!(connection = %self.id, ?event, "failed to dispatch lifecycle event; swallowing");
        }
    }

    /// The transport reported an exception.
    ///
    /// Already-inactive connections discard the error silently: transport
    /// races during reconnection are expected and must not surface as noise.
    /// Otherwise the cause is wrapped into a broker-level error, the
    /// connection goes inactive, and `connection_exception` is dispatched on
    /// the worker pool. Exactly one of {exception, destroyed} is delivered
    /// per connection, decided by the same compare-and-swap as
    /// [`Self::on_inactive`].
    pub fn on_transport_exception(&self, cause: Box<dyn std::error::Error + Send + Sync>) {
        if !self.deactivate() {
            trace!(connection = %self.id, %cause, "exception on inactive connection discarded");
            return;
        }
        let error = TransportError::Exception {
            connection: self.id,
            cause,
        };
        debug!(connection = %self.id, %error, "connection exception");
        if let Err(event) = self.events.dispatch(LifecycleEvent::Exception(self.id, error)) {
            metrics::inc_errors();
            error!(connection = %self.id, ?event, "failed to dispatch lifecycle event; swallowing");
        }
    }

    /// Flip active → inactive. Returns whether this call won the race.
    fn deactivate(&self) -> bool {
        let won = self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.registry.remove(self.id);
            metrics::dec_connections();
        }
        won
    }
}
