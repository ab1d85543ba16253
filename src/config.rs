//! Queue configuration types.
//!
//! [`QueueSettings`] carries the externally loaded knobs governing delivery:
//! routing mode, the redelivery threshold, the dead-letter target, and an
//! optional redelivery delay. The types derive `serde` traits so an embedding
//! broker can load them from whatever format its configuration uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a queue distributes pending references across its consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingMode {
    /// Round-robin over every attached consumer with remaining credit.
    #[default]
    Shared,
    /// All references go to a single designated active consumer; ownership
    /// transfers to another attached consumer when the active one detaches.
    Exclusive,
}

/// Delivery policy for one queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Dispatch mode; see [`RoutingMode`].
    #[serde(default)]
    pub routing: RoutingMode,
    /// Completed unacknowledged delivery attempts permitted before a
    /// reference is dead-lettered or dropped. `None` means unbounded: the
    /// reference is redelivered forever.
    #[serde(default = "defaults::max_delivery_attempts")]
    pub max_delivery_attempts: Option<u32>,
    /// Address messages move to after exhausting their attempts. With no
    /// address configured, exhausted references are dropped rather than
    /// retried forever.
    #[serde(default)]
    pub dead_letter_address: Option<String>,
    /// Delay before a redelivered reference becomes eligible for dispatch
    /// again. Dispatch never reorders past a delayed reference.
    #[serde(default)]
    pub redelivery_delay: Option<Duration>,
}

mod defaults {
    /// Default redelivery threshold, matching the broker-wide address setting.
    pub(super) fn max_delivery_attempts() -> Option<u32> { Some(10) }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            routing: RoutingMode::Shared,
            max_delivery_attempts: defaults::max_delivery_attempts(),
            dead_letter_address: None,
            redelivery_delay: None,
        }
    }
}

impl QueueSettings {
    /// Settings for a shared queue with the default threshold.
    #[must_use]
    pub fn shared() -> Self { Self::default() }

    /// Settings for an exclusive queue with the default threshold.
    #[must_use]
    pub fn exclusive() -> Self {
        Self {
            routing: RoutingMode::Exclusive,
            ..Self::default()
        }
    }

    /// Override the redelivery threshold; `None` disables dead-lettering.
    #[must_use]
    pub fn with_max_delivery_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    /// Set the dead-letter address.
    #[must_use]
    pub fn with_dead_letter_address(mut self, address: impl Into<String>) -> Self {
        self.dead_letter_address = Some(address.into());
        self
    }

    /// Set the redelivery delay.
    #[must_use]
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }
}
