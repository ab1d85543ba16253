//! Tests for the frame transport channel and lifecycle dispatcher.
//!
//! They cover frame forwarding, batch boundaries, writability, and the
//! guarantee that each connection delivers exactly one terminal notification
//! even under concurrent close and error races.

mod common;

use std::sync::{Arc, atomic::Ordering};

use bytes::Bytes;
use common::{CollectingListener, RecordingHandler, TestResult, wait_until};
use relaymq::{
    ConfigError,
    ConnectionId,
    ConnectionRegistry,
    FrameTransportChannel,
    LifecycleDispatcher,
    TransportError,
};
use rstest::rstest;
use serial_test::serial;
use tokio::time::Duration;

struct Harness {
    registry: Arc<ConnectionRegistry>,
    handler: Arc<RecordingHandler>,
    listener: Arc<CollectingListener>,
    dispatcher: LifecycleDispatcher,
}

impl Harness {
    fn new() -> TestResult<Self> {
        let listener = CollectingListener::new();
        let dispatcher = LifecycleDispatcher::builder()
            .capacity(256)
            .workers(2)
            .build(listener.clone())?;
        Ok(Self {
            registry: Arc::new(ConnectionRegistry::new()),
            handler: RecordingHandler::new(),
            listener,
            dispatcher,
        })
    }

    fn channel(&self, id: u64) -> FrameTransportChannel<RecordingHandler> {
        FrameTransportChannel::new(
            ConnectionId::new(id),
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
            self.listener.clone(),
            self.dispatcher.handle(),
        )
    }
}

fn io_error() -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "peer reset",
    ))
}

#[tokio::test]
async fn active_connection_is_tracked() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(1);
    assert!(!channel.is_active());

    channel.on_active();
    assert!(channel.is_active());
    assert!(harness.registry.contains(ConnectionId::new(1)));
    assert_eq!(harness.registry.len(), 1);

    channel.on_inactive();
    assert!(!harness.registry.contains(ConnectionId::new(1)));
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn frames_reach_the_handler_in_order() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(7);
    channel.on_active();

    channel.on_frame_received(Bytes::from_static(b"one"))?;
    channel.on_frame_received(Bytes::from_static(b"two"))?;
    channel.on_read_batch_complete();

    let frames = harness.handler.frames.lock().expect("lock");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].1, Bytes::from_static(b"one"));
    assert_eq!(frames[1].1, Bytes::from_static(b"two"));
    drop(frames);
    assert_eq!(harness.handler.batch_count(), 1);
    harness.dispatcher.shutdown().await;
    Ok(())
}

/// The end-of-batch boundary fires even when the read cycle produced no
/// frames.
#[tokio::test]
async fn batch_boundary_fires_with_zero_frames() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(3);
    channel.on_active();

    channel.on_read_batch_complete();
    assert_eq!(harness.handler.frame_count(), 0);
    assert_eq!(harness.handler.batch_count(), 1);
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn handler_failure_is_wrapped_and_reported() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(9);
    channel.on_active();
    harness.handler.fail.store(true, Ordering::SeqCst);

    let err = channel
        .on_frame_received(Bytes::from_static(b"bad"))
        .expect_err("handler rejection should surface");
    assert!(matches!(err, TransportError::Handler { connection, .. }
        if connection == ConnectionId::new(9)));
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn writability_is_forwarded_synchronously() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(4);
    channel.on_active();

    channel.on_writability_changed(false);
    channel.on_writability_changed(true);

    // No dispatcher involved: the records are visible immediately.
    let writability = harness.listener.writability.lock().expect("lock");
    assert_eq!(
        *writability,
        vec![(ConnectionId::new(4), false), (ConnectionId::new(4), true)]
    );
    drop(writability);
    assert!(harness.registry.is_writable(ConnectionId::new(4)));
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_close_is_a_no_op() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(5);
    channel.on_active();

    channel.on_inactive();
    channel.on_inactive();
    channel.on_inactive();

    assert!(
        wait_until(Duration::from_secs(2), || harness
            .listener
            .destroyed_count()
            == 1)
        .await
    );
    harness.dispatcher.shutdown().await;
    assert_eq!(harness.listener.terminal_count(), 1);
    Ok(())
}

#[tokio::test]
async fn exception_on_inactive_connection_is_discarded() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(6);
    channel.on_active();

    channel.on_inactive();
    channel.on_transport_exception(io_error());

    assert!(
        wait_until(Duration::from_secs(2), || harness
            .listener
            .destroyed_count()
            == 1)
        .await
    );
    harness.dispatcher.shutdown().await;
    assert_eq!(harness.listener.exception_count(), 0);
    assert_eq!(harness.listener.terminal_count(), 1);
    Ok(())
}

#[tokio::test]
async fn exception_wins_over_later_close() -> TestResult {
    let harness = Harness::new()?;
    let channel = harness.channel(8);
    channel.on_active();

    channel.on_transport_exception(io_error());
    channel.on_inactive();

    assert!(
        wait_until(Duration::from_secs(2), || harness
            .listener
            .exception_count()
            == 1)
        .await
    );
    harness.dispatcher.shutdown().await;
    assert_eq!(harness.listener.destroyed_count(), 0);
    assert_eq!(harness.listener.terminal_count(), 1);
    Ok(())
}

/// Concurrent close and error must deliver exactly one terminal
/// notification, never both, never duplicates.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_close_and_error_deliver_one_notification() -> TestResult {
    const ROUNDS: u64 = 100;

    common::init_logging();
    let harness = Harness::new()?;
    for round in 0..ROUNDS {
        let channel = Arc::new(harness.channel(round));
        channel.on_active();

        let closer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.on_inactive() })
        };
        let failer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.on_transport_exception(io_error()) })
        };
        futures::future::try_join(closer, failer).await?;
    }

    let listener = harness.listener.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            listener.terminal_count() == ROUNDS as usize
        })
        .await
    );
    harness.dispatcher.shutdown().await;
    assert_eq!(harness.listener.terminal_count(), ROUNDS as usize);
    Ok(())
}

/// A failing listener is logged and swallowed; later events still flow.
#[tokio::test]
async fn listener_failure_does_not_stall_the_dispatcher() -> TestResult {
    let harness = Harness::new()?;
    harness.listener.fail_next.store(true, Ordering::SeqCst);

    let first = harness.channel(10);
    first.on_active();
    first.on_inactive();

    let second = harness.channel(11);
    second.on_active();
    second.on_inactive();

    assert!(
        wait_until(Duration::from_secs(2), || harness
            .listener
            .destroyed_count()
            == 2)
        .await
    );
    harness.dispatcher.shutdown().await;
    Ok(())
}

#[rstest]
#[case::zero_capacity(0, 1)]
#[case::oversized_capacity(relaymq::transport::MAX_EVENT_CAPACITY + 1, 1)]
#[tokio::test]
async fn builder_rejects_invalid_capacity(
    #[case] capacity: usize,
    #[case] workers: usize,
) -> TestResult {
    let listener = CollectingListener::new();
    let err = LifecycleDispatcher::builder()
        .capacity(capacity)
        .workers(workers)
        .build(listener)
        .expect_err("capacity outside bounds must be rejected");
    assert_eq!(err, ConfigError::InvalidCapacity(capacity));
    Ok(())
}

#[rstest]
#[case::zero_workers(0)]
#[case::oversized_workers(relaymq::transport::MAX_WORKERS + 1)]
#[tokio::test]
async fn builder_rejects_invalid_workers(#[case] workers: usize) -> TestResult {
    let listener = CollectingListener::new();
    let err = LifecycleDispatcher::builder()
        .workers(workers)
        .build(listener)
        .expect_err("worker count outside bounds must be rejected");
    assert_eq!(err, ConfigError::InvalidWorkers(workers));
    Ok(())
}
