//! Receiver configuration.
//!
//! All types use `#[serde(rename_all = "camelCase")]` on field names so a
//! JSON settings file can populate them, with `#[serde(default)]` allowing
//! partial documents. Defaults follow the transport client this receiver
//! fronts: a 50-message buffer, drop-oldest backpressure, and a ceiling of
//! 1024 outstanding cache requests.

use serde::{Deserialize, Serialize};

/// What to do with an arriving message when the receive buffer is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStrategy {
    /// Evict the oldest buffered message to admit the new one.
    DropOldest,
    /// Discard the arriving message and keep the buffer as is.
    DropLatest,
}

impl BackpressureStrategy {
    /// Stable label for metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            Self::DropOldest => "drop_oldest",
            Self::DropLatest => "drop_latest",
        }
    }
}

/// Configuration for a [`DirectReceiver`](crate::receiver::DirectReceiver).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiverConfig {
    /// Topics subscribed at start and unsubscribed at termination.
    pub topics: Vec<String>,
    /// Receive buffer capacity in messages.
    pub buffer_capacity: usize,
    /// Strategy applied when the buffer is full.
    pub backpressure: BackpressureStrategy,
    /// Ceiling on concurrently outstanding cache requests.
    pub max_outstanding_cache_requests: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            buffer_capacity: 50,
            backpressure: BackpressureStrategy::DropOldest,
            max_outstanding_cache_requests: 1024,
        }
    }
}

impl ReceiverConfig {
    /// Correct invalid values rather than rejecting them.
    ///
    /// A zero-capacity buffer cannot admit any message; it is raised to 1
    /// with a warning so the receiver still functions.
    pub fn validate(&mut self) {
        if self.buffer_capacity == 0 {
            tracing::warn!("bufferCapacity of 0 raised to 1");
            self.buffer_capacity = 1;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
