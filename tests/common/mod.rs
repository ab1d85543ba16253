//! Shared fixtures for the integration tests.
#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use relaymq::{
    ConnectionId,
    ConnectionLifecycleListener,
    ListenerError,
    Message,
    MessageId,
    TransportError,
};
use tokio::time::{Duration, Instant, sleep};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Build a message whose id and payload encode `n`.
pub fn message(n: u64) -> Arc<Message> {
    Arc::new(Message::new(
        MessageId::new(n),
        Bytes::copy_from_slice(&n.to_be_bytes()),
    ))
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(2)).await;
    }
    condition()
}

/// Lifecycle listener that records every notification it receives.
#[derive(Default)]
pub struct CollectingListener {
    pub destroyed: Mutex<Vec<ConnectionId>>,
    pub exceptions: Mutex<Vec<ConnectionId>>,
    pub writability: Mutex<Vec<(ConnectionId, bool)>>,
    /// When set, the next destroyed/exception delivery fails once.
    pub fail_next: AtomicBool,
}

impl CollectingListener {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn destroyed_count(&self) -> usize { self.destroyed.lock().expect("lock").len() }

    pub fn exception_count(&self) -> usize { self.exceptions.lock().expect("lock").len() }

    pub fn terminal_count(&self) -> usize { self.destroyed_count() + self.exception_count() }

    fn maybe_fail(&self) -> Result<(), ListenerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ListenerError::msg("listener failure injected"));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionLifecycleListener for CollectingListener {
    fn connection_ready_for_writes(&self, id: ConnectionId, writable: bool) {
        self.writability.lock().expect("lock").push((id, writable));
    }

    async fn connection_destroyed(&self, id: ConnectionId) -> Result<(), ListenerError> {
        self.destroyed.lock().expect("lock").push(id);
        self.maybe_fail()
    }

    async fn connection_exception(
        &self,
        id: ConnectionId,
        _error: TransportError,
    ) -> Result<(), ListenerError> {
        self.exceptions.lock().expect("lock").push(id);
        self.maybe_fail()
    }
}

/// Buffer handler that records frames and batch boundaries.
#[derive(Default)]
pub struct RecordingHandler {
    pub frames: Mutex<Vec<(ConnectionId, Bytes)>>,
    pub batches: Mutex<Vec<ConnectionId>>,
    /// When set, every frame is rejected.
    pub fail: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn frame_count(&self) -> usize { self.frames.lock().expect("lock").len() }

    pub fn batch_count(&self) -> usize { self.batches.lock().expect("lock").len() }
}

impl relaymq::BufferHandler for RecordingHandler {
    fn buffer_received(
        &self,
        id: ConnectionId,
        buffer: &Bytes,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("frame rejected".into());
        }
        self.frames.lock().expect("lock").push((id, buffer.clone()));
        Ok(())
    }

    fn end_of_batch(&self, id: ConnectionId) {
        self.batches.lock().expect("lock").push(id);
    }
}
