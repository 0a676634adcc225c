//! Branded identifier newtypes and the allocator they come from.
//!
//! Every registration in the dispatch layer is keyed by a small integer
//! handle rather than a pointer: dispatch entries, flow bindings, pending
//! request/reply exchanges, and subscription operations each get their own
//! branded `u64` so the tables cannot be indexed with the wrong kind of key.
//! Handles are allocated from a monotonic counter and never reused, so a
//! stale handle observed by a late callback can only miss, never alias a
//! newer registration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! branded_u64 {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw value.
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// The raw numeric value (for logging and table keys).
            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

branded_u64! {
    /// Local key mapping a subscription or request to its handler.
    ///
    /// Chosen by the dispatch layer at registration time, threaded back by
    /// the transport on each delivery, and never transmitted on the wire.
    DispatchId
}

branded_u64! {
    /// Handle for a bound flow (its event listener plus message handler).
    FlowId
}

branded_u64! {
    /// Application-chosen identifier for an outstanding cache request.
    ///
    /// Carried opaquely in request metadata and echoed back in matching
    /// response metadata by the transport. Must be unique among the
    /// caller's outstanding cache requests on a session.
    CacheRequestId
}

branded_u64! {
    /// Internal handle for a pending request/reply exchange.
    ///
    /// Encoded (after the reserved marker) into the correlation identifier
    /// of an outgoing request and decoded back from reply metadata.
    RequestHandle
}

branded_u64! {
    /// Tag correlating a subscribe/unsubscribe operation with the session
    /// event that confirms or refuses it.
    CorrelationTag
}

/// Monotonic handle allocator backing the registration arenas.
///
/// Starts at 1; zero is never handed out, so it can serve as a sentinel in
/// transport glue that needs one. Allocation is a single relaxed
/// fetch-and-add, safe from any thread.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Allocator whose first handle is 1.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hand out the next handle.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
