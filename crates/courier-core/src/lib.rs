//! # courier-core
//!
//! Foundation types for the courier messaging client core.
//!
//! This crate provides the shared vocabulary the dispatch and receiver crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::DispatchId`], [`ids::FlowId`],
//!   [`ids::CacheRequestId`], [`ids::RequestHandle`], [`ids::CorrelationTag`]
//!   as `u64` newtypes, plus the monotonic [`ids::IdAllocator`] they are
//!   handed out from
//! - **Messages**: [`message::InboundMessage`] (opaque payload + the metadata
//!   the dispatch layer consults) and [`message::CallbackStatus`] returned to
//!   the transport
//! - **Events**: [`events::SessionEvent`], [`events::FlowEvent`], and
//!   [`events::CacheEvent`] lifecycle notifications
//! - **Errors**: [`errors::DispatchError`] contract-violation hierarchy via
//!   `thiserror`
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other courier crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
