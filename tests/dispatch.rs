//! Tests for shared-mode dispatch: round-robin, prefetch credit, and
//! skipping consumers that cannot accept work.

mod common;

use common::{TestResult, message};
use relaymq::{ConnectionId, Queue, QueueSettings};
use tokio::time::{Duration, timeout};

#[tokio::test]
async fn round_robin_alternates_between_consumers() -> TestResult {
    let queue = Queue::new("work", QueueSettings::shared());
    let (first, mut first_rx) = queue.attach(ConnectionId::new(1), 10);
    let (second, mut second_rx) = queue.attach(ConnectionId::new(2), 10);

    for n in 0..4 {
        queue.enqueue(message(n));
    }

    let a = first_rx.recv().await.ok_or("missing delivery")?;
    let b = second_rx.recv().await.ok_or("missing delivery")?;
    let c = first_rx.recv().await.ok_or("missing delivery")?;
    let d = second_rx.recv().await.ok_or("missing delivery")?;

    assert_eq!((a.consumer, a.sequence), (first, 0));
    assert_eq!((b.consumer, b.sequence), (second, 1));
    assert_eq!((c.consumer, c.sequence), (first, 2));
    assert_eq!((d.consumer, d.sequence), (second, 3));
    Ok(())
}

/// A consumer with exhausted credit is skipped, not waited on.
#[tokio::test]
async fn consumer_without_credit_is_skipped() -> TestResult {
    let queue = Queue::new("work", QueueSettings::shared());
    let (first, mut first_rx) = queue.attach(ConnectionId::new(1), 1);
    let (second, mut second_rx) = queue.attach(ConnectionId::new(2), 10);

    for n in 0..4 {
        queue.enqueue(message(n));
    }

    // The first consumer holds one unacknowledged delivery; the remainder
    // flow to the second without blocking.
    let held = first_rx.recv().await.ok_or("missing delivery")?;
    assert_eq!(held.consumer, first);
    for expected in 1..4 {
        let delivery = second_rx.recv().await.ok_or("missing delivery")?;
        assert_eq!(delivery.consumer, second);
        assert_eq!(delivery.sequence, expected);
    }
    assert!(
        timeout(Duration::from_millis(50), first_rx.recv())
            .await
            .is_err()
    );
    Ok(())
}

/// Acknowledgment restores exactly one credit and dispatch resumes.
#[tokio::test]
async fn credit_restored_on_ack_resumes_dispatch() -> TestResult {
    let queue = Queue::new("work", QueueSettings::shared());
    let (_, mut rx) = queue.attach(ConnectionId::new(1), 1);

    for n in 0..3 {
        queue.enqueue(message(n));
    }

    for expected in 0..3 {
        let delivery = rx.recv().await.ok_or("missing delivery")?;
        assert_eq!(delivery.sequence, expected);
        assert_eq!(queue.delivering_count(), 1);
        queue.acknowledge(delivery.sequence);
    }
    assert_eq!(queue.message_count(), 0);
    Ok(())
}

/// A consumer whose receiver is gone never gets a dispatch decision; its
/// share is discarded and redirected, not retried against the dead channel.
#[tokio::test]
async fn closed_consumer_is_retired_and_work_redirected() -> TestResult {
    let queue = Queue::new("work", QueueSettings::shared());
    let (_, first_rx) = queue.attach(ConnectionId::new(1), 10);
    let (second, mut second_rx) = queue.attach(ConnectionId::new(2), 10);

    drop(first_rx);
    for n in 0..4 {
        queue.enqueue(message(n));
    }

    for expected in 0..4 {
        let delivery = second_rx.recv().await.ok_or("missing delivery")?;
        assert_eq!(delivery.consumer, second);
        assert_eq!(delivery.sequence, expected);
    }
    assert_eq!(queue.consumer_count(), 1);
    Ok(())
}

/// Deliveries handed to a consumer that died before receiving them become
/// redelivery candidates on disconnect, preserving order for the survivor.
#[tokio::test]
async fn disconnect_redirects_in_flight_work() -> TestResult {
    let queue = Queue::new("work", QueueSettings::shared());
    let (_, mut doomed_rx) = queue.attach(ConnectionId::new(1), 10);
    for n in 0..3 {
        queue.enqueue(message(n));
    }
    for _ in 0..3 {
        doomed_rx.recv().await.ok_or("missing delivery")?;
    }

    drop(doomed_rx);
    queue.disconnect_connection(ConnectionId::new(1));
    assert_eq!(queue.pending_count(), 3);

    let (_, mut survivor_rx) = queue.attach(ConnectionId::new(2), 10);
    for expected in 0..3 {
        let delivery = survivor_rx.recv().await.ok_or("missing redelivery")?;
        assert_eq!(delivery.sequence, expected);
        assert_eq!(delivery.delivery_count, 1);
    }
    Ok(())
}
