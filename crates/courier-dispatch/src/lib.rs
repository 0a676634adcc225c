//! # courier-dispatch
//!
//! Receive-side demultiplexing for transport callback streams.
//!
//! - **Registry**: Concurrent dispatch table mapping dispatch IDs to message handlers
//! - **Router**: Session and flow lifecycle events to their single listeners
//! - **Reply correlator**: Marker-tagged request/reply matching with exactly-once delivery
//! - **Cache correlator**: Strict identity filtering of cache responses + completion events
//! - **Subscription tracker**: Oneshot confirmation of subscribe/unsubscribe operations
//! - **Session dispatch**: One-of-everything composite wired for transport callbacks
//!
//! All entry points are called from transport callback threads and must
//! return promptly; no handler or listener is ever invoked while an
//! internal lock is held.
//!
//! ## Crate Position
//!
//! Dispatch layer. Depends on: courier-core.
//! Depended on by: courier-receiver.

#![deny(unsafe_code)]

pub mod cache;
pub mod metrics;
pub mod registry;
pub mod reply;
pub mod router;
pub mod session;
pub mod subscriptions;

// Re-export main public API
pub use cache::{CacheCompletionHandler, CacheCorrelator, CacheMessageHandler};
pub use registry::{DispatchRegistry, MessageHandler};
pub use reply::{ReplyClassification, ReplyCorrelator, ReplyHandler, ReplyRouting, TaggedRequest};
pub use router::{EventRouter, FlowBinding, FlowEventListener, SessionEventListener};
pub use session::{SessionDispatch, TeardownSummary};
pub use subscriptions::{SubscriptionOutcome, SubscriptionTracker};
