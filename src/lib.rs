//! Public API for the `relaymq` delivery core.
//!
//! This crate implements the delivery heart of a message broker: a
//! per-connection frame transport channel, the per-queue
//! delivery/redelivery/dead-letter state machine, consumer dispatch with
//! prefetch flow control, and the transaction-session glue that applies
//! commits and rollbacks atomically. Wire protocols, persistence, and
//! administration live outside; frames are opaque byte sequences here.

pub mod bridge;
pub mod config;
pub mod delivery;
pub mod error;
pub use error::Result;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod session;
pub mod transport;
pub mod txn;

pub use bridge::{QueueLifecycleBridge, QueueRegistry};
pub use config::{QueueSettings, RoutingMode};
pub use delivery::{DeadLetterSink, RedeliveryVerdict};
pub use error::{AckOutcome, ConfigError, DeliveryOutcome, ListenerError, TransportError};
pub use message::{Message, MessageId, MessageReference};
pub use queue::{ConsumerId, Delivery, DeliveryReceiver, Queue};
pub use session::{ConnectionId, ConnectionRegistry};
pub use transport::{
    BufferHandler,
    ConnectionLifecycleListener,
    FrameTransportChannel,
    LifecycleDispatcher,
    LifecycleEvent,
    LifecycleHandle,
};
pub use txn::TransactionSession;
