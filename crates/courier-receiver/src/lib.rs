//! # courier-receiver
//!
//! Buffered direct message receiver assembled on the dispatch core.
//!
//! - **Receiver**: Lifecycle (start, receive, terminate) over a dispatch entry and topic subscriptions
//! - **Buffer**: Bounded FIFO with drop-oldest/drop-latest backpressure and discard indications
//! - **Config**: Topics, buffer capacity, and backpressure strategy
//! - **Subscription seam**: Trait the transport binding implements to issue subscribe/unsubscribe
//!
//! The transport's callback thread only ever enqueues; consumption happens
//! on the application's schedule, by awaiting [`DirectReceiver::receive`]
//! or through an installed message callback serviced from a worker task.
//!
//! ## Crate Position
//!
//! Top layer. Depends on: courier-core, courier-dispatch.

#![deny(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod errors;
pub mod receiver;
pub mod subscription;

// Re-export main public API
pub use buffer::MessageBuffer;
pub use config::{BackpressureStrategy, ReceiverConfig};
pub use errors::ReceiverError;
pub use receiver::{
    DirectReceiver, MessageCallback, ReceiverState, TerminationEvent, TerminationListener,
};
pub use subscription::SubscriptionService;
