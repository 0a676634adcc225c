//! Session-level composition of the dispatch components.
//!
//! [`SessionDispatch`] owns one of everything — registry, event router,
//! reply correlator, cache correlator, subscription tracker — and exposes
//! the entry points a transport binding calls from its callback threads.
//! The components stay independently usable; this type adds the glue that
//! crosses them:
//!
//! - replies that turn out not to be replies fall through to topic dispatch,
//! - subscription confirmations resolve their tracker waiter before the
//!   session listener sees the event,
//! - flow messages resolve the flow's dispatch entry,
//! - teardown drains every table in one call.
//!
//! Every entry point is safe to call concurrently from distinct callback
//! threads and returns promptly; handler invocations happen outside all
//! internal locks.

use courier_core::errors::DispatchError;
use courier_core::events::{CacheEvent, FlowEvent, SessionEvent};
use courier_core::ids::{CacheRequestId, DispatchId, FlowId};
use courier_core::message::{CallbackStatus, InboundMessage};
use metrics::counter;
use tracing::{debug, info};

use crate::cache::CacheCorrelator;
use crate::metrics::DISPATCH_UNROUTABLE_TOTAL;
use crate::registry::{DispatchRegistry, MessageHandler};
use crate::reply::{ReplyCorrelator, ReplyRouting};
use crate::router::{EventRouter, FlowBinding, FlowEventListener};
use crate::subscriptions::{SubscriptionTracker, outcome_of};

/// What a call to [`SessionDispatch::teardown`] cleared out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownSummary {
    /// Dispatch entries removed from the registry (flow handlers included).
    pub handlers_unregistered: usize,
    /// Flows whose event listeners were dropped.
    pub flows_unbound: usize,
    /// Pending request/reply correlations cancelled.
    pub replies_cancelled: usize,
    /// Outstanding cache requests cancelled.
    pub cache_requests_cancelled: usize,
}

/// One session's receive-side dispatch state.
pub struct SessionDispatch {
    registry: DispatchRegistry,
    router: EventRouter,
    replies: ReplyCorrelator,
    cache: CacheCorrelator,
    subscriptions: SubscriptionTracker,
}

impl SessionDispatch {
    /// Dispatch state with the default cache-request ceiling.
    pub fn new() -> Self {
        Self::with_cache_limit(crate::cache::DEFAULT_MAX_OUTSTANDING)
    }

    /// Dispatch state with an explicit cache-request ceiling.
    pub fn with_cache_limit(max_outstanding_cache: usize) -> Self {
        Self {
            registry: DispatchRegistry::new(),
            router: EventRouter::new(),
            replies: ReplyCorrelator::new(),
            cache: CacheCorrelator::with_max_outstanding(max_outstanding_cache),
            subscriptions: SubscriptionTracker::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Component access
    // ─────────────────────────────────────────────────────────────────────

    /// The dispatch table and its ID arena.
    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    /// The session/flow event router.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// The request/reply correlator.
    pub fn replies(&self) -> &ReplyCorrelator {
        &self.replies
    }

    /// The cache request correlator.
    pub fn cache(&self) -> &CacheCorrelator {
        &self.cache
    }

    /// The subscription confirmation tracker.
    pub fn subscriptions(&self) -> &SubscriptionTracker {
        &self.subscriptions
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport-facing entry points
    // ─────────────────────────────────────────────────────────────────────

    /// Deliver a message to the handler registered under `dispatch_id`.
    ///
    /// A missing entry is the benign unsubscribe race: the message is
    /// discarded and a neutral consumed status returned so the transport
    /// neither retries nor errors.
    pub fn on_message(&self, dispatch_id: DispatchId, message: InboundMessage) -> CallbackStatus {
        self.dispatch(dispatch_id, message, "session")
    }

    /// Deliver a message arriving in a reply delivery context.
    ///
    /// Marked replies go to their pending requester (or are dropped when
    /// none is pending); anything else falls through to ordinary topic
    /// dispatch under `dispatch_id`.
    pub fn on_reply_message(
        &self,
        dispatch_id: DispatchId,
        message: InboundMessage,
    ) -> CallbackStatus {
        match self.replies.route(message) {
            ReplyRouting::Delivered(_) | ReplyRouting::Discarded => CallbackStatus::Consumed,
            ReplyRouting::NotAReply(message) => self.dispatch(dispatch_id, message, "session"),
        }
    }

    /// Deliver a cache response arriving in the delivery context of
    /// `context_id`. Always consumed; the identity filter decides whether
    /// it reaches a handler.
    pub fn on_cache_message(
        &self,
        context_id: CacheRequestId,
        message: InboundMessage,
    ) -> CallbackStatus {
        self.cache.on_cache_message(context_id, message)
    }

    /// Deliver the completion event of a cache request.
    pub fn on_cache_event(&self, event: CacheEvent) {
        self.cache.on_cache_event(event);
    }

    /// Deliver a session lifecycle event.
    ///
    /// Subscription confirmations resolve their parked waiter first; the
    /// event then reaches the session listener unchanged either way.
    pub fn on_session_event(&self, event: SessionEvent) {
        if let (Some(tag), Some(outcome)) = (event.correlation_tag, outcome_of(&event)) {
            let _ = self.subscriptions.resolve(tag, outcome);
        }
        self.router.on_session_event(event);
    }

    /// Deliver a message arriving on a flow's delivery context.
    pub fn on_flow_message(&self, flow_id: FlowId, message: InboundMessage) -> CallbackStatus {
        match self.router.flow_dispatch_id(flow_id) {
            Some(dispatch_id) => self.dispatch(dispatch_id, message, "flow"),
            None => {
                counter!(DISPATCH_UNROUTABLE_TOTAL, "path" => "flow").increment(1);
                debug!(flow_id = flow_id.value(), "message for unbound flow discarded");
                CallbackStatus::Consumed
            }
        }
    }

    /// Deliver a flow lifecycle event.
    pub fn on_flow_event(&self, flow_id: FlowId, event: FlowEvent) {
        self.router.on_flow_event(flow_id, event);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Application-facing operations
    // ─────────────────────────────────────────────────────────────────────

    /// Bind a flow: registers `handler` under a fresh dispatch ID and
    /// stores `listener` under a fresh flow ID.
    pub fn bind_flow(
        &self,
        handler: MessageHandler,
        listener: FlowEventListener,
    ) -> Result<FlowBinding, DispatchError> {
        let dispatch_id = self.registry.allocate_id();
        self.registry.register(dispatch_id, handler)?;
        Ok(self.router.bind_flow(dispatch_id, listener))
    }

    /// Unbind a flow and unregister its dispatch entry. Returns whether the
    /// flow was bound; callbacks already past the table are allowed to
    /// finish, later ones are discarded.
    pub fn unbind_flow(&self, flow_id: FlowId) -> bool {
        match self.router.unbind_flow(flow_id) {
            Some(dispatch_id) => {
                let _ = self.registry.unregister(dispatch_id);
                true
            }
            None => false,
        }
    }

    /// Drop every piece of per-session state: parked subscription waiters,
    /// pending replies, outstanding cache requests, flow bindings, dispatch
    /// entries. Callbacks arriving afterwards hit empty tables and take the
    /// benign discard paths.
    pub fn teardown(&self) -> TeardownSummary {
        self.subscriptions.cancel_all();
        let replies_cancelled = self.replies.cancel_all();
        let cache_requests_cancelled = self.cache.cancel_all();
        let flows_unbound = self.router.clear().len();
        let handlers_unregistered = self.registry.clear();
        let summary = TeardownSummary {
            handlers_unregistered,
            flows_unbound,
            replies_cancelled,
            cache_requests_cancelled,
        };
        info!(
            handlers = summary.handlers_unregistered,
            flows = summary.flows_unbound,
            replies = summary.replies_cancelled,
            cache_requests = summary.cache_requests_cancelled,
            "session dispatch state torn down"
        );
        summary
    }

    fn dispatch(
        &self,
        dispatch_id: DispatchId,
        message: InboundMessage,
        path: &'static str,
    ) -> CallbackStatus {
        match self.registry.lookup(dispatch_id) {
            Some(handler) => handler(message),
            None => {
                counter!(DISPATCH_UNROUTABLE_TOTAL, "path" => path).increment(1);
                debug!(
                    dispatch_id = dispatch_id.value(),
                    path, "message for unknown dispatch id discarded"
                );
                CallbackStatus::Consumed
            }
        }
    }
}

impl Default for SessionDispatch {
    fn default() -> Self {
        Self::new()
    }
}
