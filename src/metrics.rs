//! Metric helpers for `relaymq`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled the helpers compile to no-ops so call sites need no gating.

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "relaymq_connections_active";
/// Name of the counter tracking frames handed to the buffer handler.
pub const FRAMES_PROCESSED: &str = "relaymq_frames_processed_total";
/// Name of the counter tracking references handed to consumers.
pub const DELIVERIES: &str = "relaymq_deliveries_total";
/// Name of the counter tracking references returned to pending.
pub const REDELIVERIES: &str = "relaymq_redeliveries_total";
/// Name of the counter tracking messages moved to a dead-letter address.
pub const DEAD_LETTERS: &str = "relaymq_dead_letters_total";
/// Name of the counter tracking references dropped on exhaustion.
pub const DROPPED_ON_EXHAUSTION: &str = "relaymq_dropped_on_exhaustion_total";
/// Name of the counter tracking lifecycle events handled by the dispatcher.
pub const LIFECYCLE_EVENTS: &str = "relaymq_lifecycle_events_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "relaymq_errors_total";

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    ::metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    ::metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame handed to the buffer handler.
pub fn inc_frames() {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(FRAMES_PROCESSED).increment(1);
}

/// Record a reference dispatched to a consumer.
pub fn inc_deliveries() {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(DELIVERIES).increment(1);
}

/// Record a reference returned to the pending collection.
pub fn inc_redeliveries() {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(REDELIVERIES).increment(1);
}

/// Record a message moved to its dead-letter address.
pub fn inc_dead_letters() {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(DEAD_LETTERS).increment(1);
}

/// Record a reference dropped after exhausting its attempts.
pub fn inc_dropped() {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(DROPPED_ON_EXHAUSTION).increment(1);
}

/// Record a lifecycle event drained by a dispatcher worker.
pub fn inc_lifecycle_events() {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(LIFECYCLE_EVENTS).increment(1);
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(ERRORS_TOTAL).increment(1);
}
