//! Subscription confirmation tracking via oneshot channels.
//!
//! Subscribe and unsubscribe complete asynchronously: the transport echoes
//! the correlation tag we attached to the operation in a later
//! `SubscriptionOk` or `SubscriptionError` session event. Each outstanding
//! operation parks a oneshot sender keyed by its tag; the matching event
//! resolves it exactly once. Events whose tag no longer has a waiter are a
//! benign teardown race and are counted, not surfaced.

use courier_core::events::{SessionEvent, SessionEventKind};
use courier_core::ids::{CorrelationTag, IdAllocator};
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::metrics::SUBSCRIPTION_ORPHAN_EVENTS_TOTAL;

/// How a subscribe/unsubscribe operation concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// The transport accepted the operation.
    Confirmed,
    /// The transport rejected the operation.
    Rejected {
        /// Transport response code from the session event.
        response_code: u32,
        /// Human-readable detail from the session event.
        info: String,
    },
}

/// Extract the subscription outcome a session event carries, if any.
pub fn outcome_of(event: &SessionEvent) -> Option<SubscriptionOutcome> {
    match event.kind {
        SessionEventKind::SubscriptionOk => Some(SubscriptionOutcome::Confirmed),
        SessionEventKind::SubscriptionError => Some(SubscriptionOutcome::Rejected {
            response_code: event.response_code,
            info: event.info.clone(),
        }),
        _ => None,
    }
}

/// Tracks outstanding subscription operations and routes their
/// confirmations back to the initiating task.
pub struct SubscriptionTracker {
    waiting: DashMap<CorrelationTag, oneshot::Sender<SubscriptionOutcome>>,
    tags: IdAllocator,
}

impl SubscriptionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            waiting: DashMap::new(),
            tags: IdAllocator::new(),
        }
    }

    /// Register an operation about to be sent, returning the fresh tag to
    /// attach to it and the receiver that will deliver its outcome.
    pub fn register(&self) -> (CorrelationTag, oneshot::Receiver<SubscriptionOutcome>) {
        let tag = CorrelationTag::new(self.tags.allocate());
        let (tx, rx) = oneshot::channel();
        // Tags are arena-fresh, so this insert never displaces a waiter.
        let _ = self.waiting.insert(tag, tx);
        trace!(tag = tag.value(), "subscription operation registered");
        (tag, rx)
    }

    /// Resolve the operation `tag` with `outcome`.
    ///
    /// Returns `true` if a waiter was found and still listening. An unknown
    /// tag or a waiter that already gave up is a benign race with teardown.
    pub fn resolve(&self, tag: CorrelationTag, outcome: SubscriptionOutcome) -> bool {
        let Some((_, tx)) = self.waiting.remove(&tag) else {
            counter!(SUBSCRIPTION_ORPHAN_EVENTS_TOTAL).increment(1);
            debug!(tag = tag.value(), "subscription event without waiter");
            return false;
        };
        if tx.send(outcome).is_err() {
            debug!(tag = tag.value(), "subscription waiter gone before outcome");
            return false;
        }
        true
    }

    /// Whether `tag` still has a parked waiter.
    pub fn has_pending(&self, tag: CorrelationTag) -> bool {
        self.waiting.contains_key(&tag)
    }

    /// Number of outstanding operations.
    pub fn pending_count(&self) -> usize {
        self.waiting.len()
    }

    /// Drop every parked waiter (their receivers see a closed channel).
    /// Session teardown path.
    pub fn cancel_all(&self) {
        self.waiting.clear();
    }
}

impl Default for SubscriptionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_empty() {
        let tracker = SubscriptionTracker::new();
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn register_returns_receiver() {
        let tracker = SubscriptionTracker::new();
        let (tag, _rx) = tracker.register();
        assert!(tracker.has_pending(tag));
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn register_allocates_distinct_tags() {
        let tracker = SubscriptionTracker::new();
        let (a, _rx_a) = tracker.register();
        let (b, _rx_b) = tracker.register();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn resolve_sends_outcome() {
        let tracker = SubscriptionTracker::new();
        let (tag, rx) = tracker.register();

        assert!(tracker.resolve(tag, SubscriptionOutcome::Confirmed));
        assert_eq!(rx.await.unwrap(), SubscriptionOutcome::Confirmed);
        assert!(!tracker.has_pending(tag));
    }

    #[test]
    fn resolve_unknown_returns_false() {
        let tracker = SubscriptionTracker::new();
        assert!(!tracker.resolve(CorrelationTag::new(404), SubscriptionOutcome::Confirmed));
    }

    #[tokio::test]
    async fn resolve_only_once() {
        let tracker = SubscriptionTracker::new();
        let (tag, rx) = tracker.register();

        assert!(tracker.resolve(tag, SubscriptionOutcome::Confirmed));
        assert!(!tracker.resolve(tag, SubscriptionOutcome::Confirmed));
        assert_eq!(rx.await.unwrap(), SubscriptionOutcome::Confirmed);
    }

    #[tokio::test]
    async fn dropped_waiter_makes_resolve_false() {
        let tracker = SubscriptionTracker::new();
        let (tag, rx) = tracker.register();
        drop(rx);
        assert!(!tracker.resolve(tag, SubscriptionOutcome::Confirmed));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_drops_senders() {
        let tracker = SubscriptionTracker::new();
        let (_, rx1) = tracker.register();
        let (_, rx2) = tracker.register();

        tracker.cancel_all();
        assert_eq!(tracker.pending_count(), 0);

        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[tokio::test]
    async fn outcomes_route_to_their_own_waiters() {
        let tracker = SubscriptionTracker::new();
        let (tag1, rx1) = tracker.register();
        let (tag2, rx2) = tracker.register();
        let (tag3, rx3) = tracker.register();
        assert_eq!(tracker.pending_count(), 3);

        let rejected = SubscriptionOutcome::Rejected {
            response_code: 403,
            info: "acl".into(),
        };
        assert!(tracker.resolve(tag2, rejected.clone()));
        assert!(tracker.resolve(tag1, SubscriptionOutcome::Confirmed));
        assert!(tracker.resolve(tag3, SubscriptionOutcome::Confirmed));
        assert_eq!(tracker.pending_count(), 0);

        assert_eq!(rx1.await.unwrap(), SubscriptionOutcome::Confirmed);
        assert_eq!(rx2.await.unwrap(), rejected);
        assert_eq!(rx3.await.unwrap(), SubscriptionOutcome::Confirmed);
    }

    #[test]
    fn outcome_of_maps_subscription_events_only() {
        let ok = SessionEvent::new(SessionEventKind::SubscriptionOk);
        assert_eq!(outcome_of(&ok), Some(SubscriptionOutcome::Confirmed));

        let err = SessionEvent::new(SessionEventKind::SubscriptionError)
            .with_response_code(503)
            .with_info("queue shutdown");
        assert_eq!(
            outcome_of(&err),
            Some(SubscriptionOutcome::Rejected {
                response_code: 503,
                info: "queue shutdown".into(),
            })
        );

        let up = SessionEvent::new(SessionEventKind::UpNotice);
        assert_eq!(outcome_of(&up), None);
    }
}
