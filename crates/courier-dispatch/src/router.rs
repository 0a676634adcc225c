//! Lifecycle event routing for sessions and flows.
//!
//! A session has at most one event listener, set at creation and replaceable
//! while the session lives. Each bound flow likewise has exactly one
//! listener, held alongside the dispatch ID of the flow's message handler so
//! flow deliveries can be resolved through the dispatch registry.
//!
//! The router never holds a lock across a listener invocation: the listener
//! handle is cloned out under a short critical section and called after the
//! guard is released, so a listener may re-enter the router (replace itself,
//! bind another flow) without deadlocking. Events with no listener are
//! dropped with a debug log and a counter — by the time a flow is torn down,
//! straggler events for it are expected and benign.

use std::sync::Arc;

use courier_core::errors::DispatchError;
use courier_core::events::{FlowEvent, SessionEvent};
use courier_core::ids::{DispatchId, FlowId, IdAllocator};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::RwLock;
use tracing::debug;

use crate::metrics::EVENTS_UNROUTED_TOTAL;

/// Listener for session lifecycle events. Invoked on a transport callback
/// thread; must return promptly.
pub type SessionEventListener = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Listener for flow lifecycle events. Invoked on the flow's callback
/// thread; must return promptly.
pub type FlowEventListener = Arc<dyn Fn(FlowEvent) + Send + Sync>;

/// Identifiers returned from binding a flow: the flow's own handle and the
/// dispatch ID its message handler was registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowBinding {
    /// Handle the transport threads back on flow callbacks.
    pub flow_id: FlowId,
    /// Registry key for the flow's message handler.
    pub dispatch_id: DispatchId,
}

struct FlowEntry {
    dispatch_id: DispatchId,
    listener: FlowEventListener,
}

/// Routes session- and flow-level events to their single listeners and
/// tracks which dispatch ID serves each bound flow.
pub struct EventRouter {
    session_listener: RwLock<Option<SessionEventListener>>,
    flows: DashMap<FlowId, FlowEntry>,
    flow_ids: IdAllocator,
}

impl EventRouter {
    /// Router with no session listener and no bound flows.
    pub fn new() -> Self {
        Self {
            session_listener: RwLock::new(None),
            flows: DashMap::new(),
            flow_ids: IdAllocator::new(),
        }
    }

    /// Install or replace the session event listener.
    pub fn set_session_listener(&self, listener: SessionEventListener) {
        *self.session_listener.write() = Some(listener);
    }

    /// Deliver a session event to the current listener, if any.
    pub fn on_session_event(&self, event: SessionEvent) {
        let listener = self.session_listener.read().clone();
        match listener {
            Some(listener) => listener(event),
            None => {
                counter!(EVENTS_UNROUTED_TOTAL, "scope" => "session").increment(1);
                debug!(kind = ?event.kind, "session event dropped: no listener");
            }
        }
    }

    /// Record a flow binding: its event listener plus the dispatch ID its
    /// message handler was registered under.
    pub fn bind_flow(&self, dispatch_id: DispatchId, listener: FlowEventListener) -> FlowBinding {
        let flow_id = FlowId::new(self.flow_ids.allocate());
        let _ = self.flows.insert(
            flow_id,
            FlowEntry {
                dispatch_id,
                listener,
            },
        );
        debug!(
            flow_id = flow_id.value(),
            dispatch_id = dispatch_id.value(),
            "flow bound"
        );
        FlowBinding {
            flow_id,
            dispatch_id,
        }
    }

    /// Replace the event listener of a live flow.
    pub fn replace_flow_listener(
        &self,
        flow_id: FlowId,
        listener: FlowEventListener,
    ) -> Result<(), DispatchError> {
        match self.flows.get_mut(&flow_id) {
            Some(mut entry) => {
                entry.value_mut().listener = listener;
                Ok(())
            }
            None => Err(DispatchError::UnknownFlow(flow_id)),
        }
    }

    /// Remove a flow binding, returning the dispatch ID its message handler
    /// occupies so the caller can unregister it. `None` if the flow was
    /// never bound or already unbound.
    pub fn unbind_flow(&self, flow_id: FlowId) -> Option<DispatchId> {
        let (_, entry) = self.flows.remove(&flow_id)?;
        debug!(flow_id = flow_id.value(), "flow unbound");
        Some(entry.dispatch_id)
    }

    /// Dispatch ID serving a flow's messages, if the flow is bound.
    pub fn flow_dispatch_id(&self, flow_id: FlowId) -> Option<DispatchId> {
        self.flows.get(&flow_id).map(|entry| entry.dispatch_id)
    }

    /// Deliver a flow event to the flow's listener, if the flow is bound.
    pub fn on_flow_event(&self, flow_id: FlowId, event: FlowEvent) {
        let listener = self
            .flows
            .get(&flow_id)
            .map(|entry| Arc::clone(&entry.listener));
        match listener {
            Some(listener) => listener(event),
            None => {
                counter!(EVENTS_UNROUTED_TOTAL, "scope" => "flow").increment(1);
                debug!(
                    flow_id = flow_id.value(),
                    kind = ?event.kind,
                    "flow event dropped: flow not bound"
                );
            }
        }
    }

    /// Number of bound flows.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Drop the session listener and every flow binding, returning the
    /// dispatch IDs that served the flows. Used at session teardown.
    pub fn clear(&self) -> Vec<DispatchId> {
        *self.session_listener.write() = None;
        let ids: Vec<DispatchId> = self
            .flows
            .iter()
            .map(|entry| entry.value().dispatch_id)
            .collect();
        self.flows.clear();
        ids
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use courier_core::events::{FlowEventKind, SessionEventKind};

    use super::*;

    fn recording_session_listener() -> (SessionEventListener, Arc<Mutex<Vec<SessionEventKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: SessionEventListener = Arc::new(move |event: SessionEvent| {
            sink.lock().unwrap().push(event.kind);
        });
        (listener, seen)
    }

    fn recording_flow_listener() -> (FlowEventListener, Arc<Mutex<Vec<FlowEventKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: FlowEventListener = Arc::new(move |event: FlowEvent| {
            sink.lock().unwrap().push(event.kind);
        });
        (listener, seen)
    }

    #[test]
    fn session_event_reaches_listener() {
        let router = EventRouter::new();
        let (listener, seen) = recording_session_listener();
        router.set_session_listener(listener);

        router.on_session_event(SessionEvent::new(SessionEventKind::UpNotice));
        assert_eq!(*seen.lock().unwrap(), vec![SessionEventKind::UpNotice]);
    }

    #[test]
    fn session_event_without_listener_is_dropped() {
        let router = EventRouter::new();
        // Must not panic; the drop is benign.
        router.on_session_event(SessionEvent::new(SessionEventKind::DownError));
    }

    #[test]
    fn replacing_session_listener_redirects_events() {
        let router = EventRouter::new();
        let (first, first_seen) = recording_session_listener();
        let (second, second_seen) = recording_session_listener();

        router.set_session_listener(first);
        router.on_session_event(SessionEvent::new(SessionEventKind::UpNotice));

        router.set_session_listener(second);
        router.on_session_event(SessionEvent::new(SessionEventKind::Reconnecting));

        assert_eq!(*first_seen.lock().unwrap(), vec![SessionEventKind::UpNotice]);
        assert_eq!(
            *second_seen.lock().unwrap(),
            vec![SessionEventKind::Reconnecting]
        );
    }

    #[test]
    fn listener_may_reenter_router() {
        // A listener that replaces itself during delivery must not deadlock:
        // the router drops its guard before invoking.
        let router = Arc::new(EventRouter::new());
        let reentered = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&router);
        let flag = Arc::clone(&reentered);
        router.set_session_listener(Arc::new(move |_event| {
            let (replacement, _seen) = recording_session_listener();
            inner.set_session_listener(replacement);
            let _ = flag.fetch_add(1, Ordering::SeqCst);
        }));

        router.on_session_event(SessionEvent::new(SessionEventKind::UpNotice));
        assert_eq!(reentered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flow_events_route_to_their_own_listener() {
        let router = EventRouter::new();
        let (listener_a, seen_a) = recording_flow_listener();
        let (listener_b, seen_b) = recording_flow_listener();
        let a = router.bind_flow(DispatchId::new(1), listener_a);
        let b = router.bind_flow(DispatchId::new(2), listener_b);

        router.on_flow_event(a.flow_id, FlowEvent::new(FlowEventKind::UpNotice));
        router.on_flow_event(b.flow_id, FlowEvent::new(FlowEventKind::Active));

        assert_eq!(*seen_a.lock().unwrap(), vec![FlowEventKind::UpNotice]);
        assert_eq!(*seen_b.lock().unwrap(), vec![FlowEventKind::Active]);
    }

    #[test]
    fn flow_event_for_unbound_flow_is_dropped() {
        let router = EventRouter::new();
        router.on_flow_event(FlowId::new(77), FlowEvent::new(FlowEventKind::DownError));
    }

    #[test]
    fn unbind_flow_returns_dispatch_id_and_stops_events() {
        let router = EventRouter::new();
        let (listener, seen) = recording_flow_listener();
        let binding = router.bind_flow(DispatchId::new(9), listener);

        assert_eq!(router.unbind_flow(binding.flow_id), Some(DispatchId::new(9)));
        assert_eq!(router.unbind_flow(binding.flow_id), None);

        router.on_flow_event(binding.flow_id, FlowEvent::new(FlowEventKind::DownError));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn replace_flow_listener_requires_live_flow() {
        let router = EventRouter::new();
        let (listener, _) = recording_flow_listener();
        let err = router
            .replace_flow_listener(FlowId::new(3), listener)
            .unwrap_err();
        assert_matches!(err, DispatchError::UnknownFlow(id) if id == FlowId::new(3));
    }

    #[test]
    fn replace_flow_listener_redirects_events() {
        let router = EventRouter::new();
        let (first, first_seen) = recording_flow_listener();
        let (second, second_seen) = recording_flow_listener();
        let binding = router.bind_flow(DispatchId::new(4), first);

        router
            .replace_flow_listener(binding.flow_id, second)
            .unwrap();
        router.on_flow_event(binding.flow_id, FlowEvent::new(FlowEventKind::Inactive));

        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec![FlowEventKind::Inactive]);
    }

    #[test]
    fn clear_returns_flow_dispatch_ids() {
        let router = EventRouter::new();
        let (listener_a, _) = recording_flow_listener();
        let (listener_b, _) = recording_flow_listener();
        let a = router.bind_flow(DispatchId::new(10), listener_a);
        let b = router.bind_flow(DispatchId::new(11), listener_b);

        let mut ids = router.clear();
        ids.sort_unstable();
        assert_eq!(ids, vec![a.dispatch_id, b.dispatch_id]);
        assert_eq!(router.flow_count(), 0);
    }
}
