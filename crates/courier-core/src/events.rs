//! Lifecycle event model for sessions, flows, and cache requests.
//!
//! Three event families, all emitted by the transport and consumed by the
//! dispatch layer's routers:
//!
//! - **[`SessionEvent`]**: connection-scoped state changes (up/down,
//!   reconnects, subscription confirmations, send-readiness).
//! - **[`FlowEvent`]**: per-flow state changes for guaranteed delivery
//!   bindings (up/down, active/inactive, reconnects).
//! - **[`CacheEvent`]**: exactly-one completion notification per cache
//!   request, carrying the request's outcome.
//!
//! Subscription confirmations carry back the [`CorrelationTag`] supplied
//! when the operation was issued; every other kind leaves it absent.

use serde::{Deserialize, Serialize};

use crate::ids::{CacheRequestId, CorrelationTag};

// ─────────────────────────────────────────────────────────────────────────────
// Session events
// ─────────────────────────────────────────────────────────────────────────────

/// Kinds of session-scoped lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// The session came up and is ready for use.
    UpNotice,
    /// The session went down and will not recover on its own.
    DownError,
    /// The initial connection attempt failed.
    ConnectFailed,
    /// The transport started reconnecting.
    Reconnecting,
    /// The transport finished reconnecting.
    Reconnected,
    /// A subscribe/unsubscribe operation was confirmed.
    SubscriptionOk,
    /// A subscribe/unsubscribe operation was refused.
    SubscriptionError,
    /// The transport can accept more outbound data after a would-block.
    CanSend,
    /// A broker acknowledgement arrived for a guaranteed publish.
    Acknowledgement,
    /// The broker rejected a published message.
    RejectedMessage,
}

/// A session-scoped lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// What happened.
    pub kind: SessionEventKind,
    /// Transport/broker response code, 0 when not applicable.
    pub response_code: u32,
    /// Human-readable detail from the transport.
    pub info: String,
    /// Tag echoed from the subscribe/unsubscribe operation this event
    /// confirms; absent for every other kind.
    pub correlation_tag: Option<CorrelationTag>,
}

impl SessionEvent {
    /// Event of the given kind with no code, info, or tag.
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            kind,
            response_code: 0,
            info: String::new(),
            correlation_tag: None,
        }
    }

    /// Attach a response code.
    #[must_use]
    pub fn with_response_code(mut self, code: u32) -> Self {
        self.response_code = code;
        self
    }

    /// Attach detail text.
    #[must_use]
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    /// Attach the echoed correlation tag.
    #[must_use]
    pub fn with_correlation_tag(mut self, tag: CorrelationTag) -> Self {
        self.correlation_tag = Some(tag);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flow events
// ─────────────────────────────────────────────────────────────────────────────

/// Kinds of flow-scoped lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventKind {
    /// The flow came up.
    UpNotice,
    /// The flow went down and will not recover on its own.
    DownError,
    /// This flow became the active consumer on an exclusive endpoint.
    Active,
    /// This flow lost active-consumer status.
    Inactive,
    /// The flow started reconnecting.
    Reconnecting,
    /// The flow finished reconnecting.
    Reconnected,
}

/// A flow-scoped lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEvent {
    /// What happened.
    pub kind: FlowEventKind,
    /// Transport/broker response code, 0 when not applicable.
    pub response_code: u32,
    /// Human-readable detail from the transport.
    pub info: String,
}

impl FlowEvent {
    /// Event of the given kind with no code or info.
    pub fn new(kind: FlowEventKind) -> Self {
        Self {
            kind,
            response_code: 0,
            info: String::new(),
        }
    }

    /// Attach a response code.
    #[must_use]
    pub fn with_response_code(mut self, code: u32) -> Self {
        self.response_code = code;
        self
    }

    /// Attach detail text.
    #[must_use]
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache events
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal outcome of a cache request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// All requested data arrived.
    Completed,
    /// The request finished but some requested data was unavailable.
    Incomplete,
    /// The request failed outright.
    Failed,
}

/// The single completion notification for an outstanding cache request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEvent {
    /// The application-chosen identifier of the request this completes.
    pub cache_request_id: CacheRequestId,
    /// How the request ended.
    pub outcome: CacheOutcome,
    /// Human-readable detail from the transport.
    pub info: String,
}

impl CacheEvent {
    /// Completion for the given request with the given outcome.
    pub fn new(cache_request_id: CacheRequestId, outcome: CacheOutcome) -> Self {
        Self {
            cache_request_id,
            outcome,
            info: String::new(),
        }
    }

    /// Attach detail text.
    #[must_use]
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }
}
