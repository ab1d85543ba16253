//! Lifecycle listener contract and the executor that drives it.
//!
//! Destroyed/exception notifications are never invoked from the I/O
//! completion path: the transport enqueues a [`LifecycleEvent`] on a bounded
//! channel and a small pool of worker tasks delivers it to the registered
//! [`ConnectionLifecycleListener`]. Downstream cleanup may itself touch the
//! network layer, so running it off the I/O task is what keeps teardown from
//! deadlocking against inbound reads. Listener failures are logged and
//! swallowed; they must never propagate back into the transport.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    error::{ConfigError, ListenerError, TransportError},
    metrics,
    session::ConnectionId,
};

/// Supported maximum for the lifecycle event queue capacity.
pub const MAX_EVENT_CAPACITY: usize = 10_000;
/// Supported maximum for the dispatcher worker count.
pub const MAX_WORKERS: usize = 64;

const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_WORKERS: usize = 2;

/// Consumer of decoded frames for one connection.
///
/// Protocol-specific and out of scope for this crate; implementations parse
/// the opaque buffer into whatever the broker core expects. Consumption is
/// synchronous with respect to the transport's read path and must not block
/// on network I/O.
pub trait BufferHandler: Send + Sync + 'static {
    /// Consume one decoded frame.
    ///
    /// # Errors
    ///
    /// Any error is wrapped in [`TransportError::Handler`] by the transport;
    /// the frame's buffer is released regardless.
    fn buffer_received(
        &self,
        id: ConnectionId,
        buffer: &Bytes,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Mark the end of one read batch, after zero or more frames.
    fn end_of_batch(&self, id: ConnectionId);
}

/// Receiver of connection lifecycle notifications.
///
/// Writability changes arrive synchronously on the I/O task and must be
/// cheap; destroyed/exception notifications arrive on a dispatcher worker.
#[async_trait]
pub trait ConnectionLifecycleListener: Send + Sync + 'static {
    /// The connection's writability changed. Called on the I/O task.
    fn connection_ready_for_writes(&self, id: ConnectionId, writable: bool);

    /// The connection closed cleanly. Fired exactly once per connection,
    /// never together with [`Self::connection_exception`].
    ///
    /// # Errors
    ///
    /// Returned errors are logged and swallowed by the dispatcher.
    async fn connection_destroyed(&self, id: ConnectionId) -> Result<(), ListenerError>;

    /// The connection failed with a transport-level error. Fired exactly
    /// once per connection, never together with
    /// [`Self::connection_destroyed`].
    ///
    /// # Errors
    ///
    /// Returned errors are logged and swallowed by the dispatcher.
    async fn connection_exception(
        &self,
        id: ConnectionId,
        error: TransportError,
    ) -> Result<(), ListenerError>;
}

/// One queued lifecycle notification.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// The connection closed; deliver `connection_destroyed`.
    Destroyed(ConnectionId),
    /// The connection failed; deliver `connection_exception`.
    Exception(ConnectionId, TransportError),
}

/// Cloneable producer side of the lifecycle event queue.
#[derive(Clone, Debug)]
pub struct LifecycleHandle {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl LifecycleHandle {
    /// Enqueue an event without blocking the I/O task.
    ///
    /// # Errors
    ///
    /// Returns the event back when the queue is full or the dispatcher has
    /// shut down; callers log and swallow the failure.
    pub fn dispatch(&self, event: LifecycleEvent) -> Result<(), LifecycleEvent> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(event)
            | mpsc::error::TrySendError::Closed(event) => event,
        })
    }
}

/// Builder for [`LifecycleDispatcher`].
#[derive(Clone, Copy, Debug)]
pub struct LifecycleDispatcherBuilder {
    capacity: usize,
    workers: usize,
}

impl Default for LifecycleDispatcherBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl LifecycleDispatcherBuilder {
    /// Set the bounded event queue capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the worker task count.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Spawn the worker pool and return the running dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCapacity`] or
    /// [`ConfigError::InvalidWorkers`] when a setting is zero or exceeds its
    /// supported maximum.
    pub fn build(
        self,
        listener: Arc<dyn ConnectionLifecycleListener>,
    ) -> Result<LifecycleDispatcher, ConfigError> {
        if self.capacity == 0 || self.capacity > MAX_EVENT_CAPACITY {
            return Err(ConfigError::InvalidCapacity(self.capacity));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        Ok(LifecycleDispatcher::spawn(self, listener))
    }
}

/// Bounded event queue plus the worker pool draining it.
#[derive(Debug)]
pub struct LifecycleDispatcher {
    handle: LifecycleHandle,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<LifecycleEvent>>>,
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl LifecycleDispatcher {
    /// Begin configuring a dispatcher.
    #[must_use]
    pub fn builder() -> LifecycleDispatcherBuilder { LifecycleDispatcherBuilder::default() }

    fn spawn(
        config: LifecycleDispatcherBuilder,
        listener: Arc<dyn ConnectionLifecycleListener>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let token = CancellationToken::new();
        let workers = (0..config.workers)
            .map(|_| {
                let rx = Arc::clone(&rx);
                let listener = Arc::clone(&listener);
                let token = token.clone();
                tokio::spawn(async move {
                    loop {
                        let event = tokio::select! {
                            () = token.cancelled() => break,
                            event = async { rx.lock().await.recv().await } => {
                                match event {
                                    Some(event) => event,
                                    None => break,
                                }
                            }
                        };
                        deliver(listener.as_ref(), event).await;
                    }
                })
            })
            .collect();
        Self {
            handle: LifecycleHandle { tx },
            rx,
            token,
            workers,
        }
    }

    /// Producer handle for the transport channels.
    #[must_use]
    pub fn handle(&self) -> LifecycleHandle { self.handle.clone() }

    /// Cancel the workers, wait for in-flight deliveries to finish, and drop
    /// whatever was still queued.
    pub async fn shutdown(self) {
        self.token.cancel();
        for worker in self.workers {
            if worker.await.is_err() {
                error!("lifecycle dispatcher worker panicked");
            }
        }
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "lifecycle events dropped at shutdown");
        }
    }
}

async fn deliver(listener: &dyn ConnectionLifecycleListener, event: LifecycleEvent) {
    metrics::inc_lifecycle_events();
    let (id, result) = match event {
        LifecycleEvent::Destroyed(id) => (id, listener.connection_destroyed(id).await),
        LifecycleEvent::Exception(id, error) => (id, listener.connection_exception(id, error).await),
    };
    if let Err(err) = result {
        metrics::inc_errors();
        error!(connection = %id, error = %err, "lifecycle listener failed; swallowing");
    }
}
