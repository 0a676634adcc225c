//! Request/reply correlation over a shared receive stream.
//!
//! Replies come back on the same callback stream as ordinary messages, so
//! requests are tagged with a correlation identifier this layer can later
//! recognize: a reserved 4-character marker followed by the request handle
//! in decimal. The marker starts with `#`, which well-behaved applications
//! do not use in that position, so application-chosen correlation data can
//! never be mistaken for a reply tag.
//!
//! Every pending request resolves exactly once. The entry's state makes the
//! terminal transition explicit: a reply and a cancellation racing on the
//! same handle serialize on the entry, one of them wins, and the loser sees
//! a terminal state and backs off.

use std::sync::Arc;

use courier_core::ids::{IdAllocator, RequestHandle};
use courier_core::message::InboundMessage;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tracing::{debug, trace};

use crate::metrics::{REPLIES_PENDING, REPLY_DROPS_TOTAL};

/// Reserved prefix on reply correlation identifiers.
pub const REPLY_CORRELATION_PREFIX: &str = "#CRP";

/// Continuation invoked with the reply message. Runs on a transport
/// callback thread; must return promptly.
pub type ReplyHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// What a correlation identifier turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClassification {
    /// Carries the reserved marker and a well-formed handle.
    Reply(RequestHandle),
    /// Carries the reserved marker but the suffix is not the digits-only
    /// handle encoding this layer emits. Addressed to this layer, yet
    /// unusable: dropped, never passed on.
    Malformed,
    /// Application correlation data (or none). Not ours.
    NotAReply,
}

/// Outcome of routing one inbound message through the correlator.
#[derive(Debug)]
pub enum ReplyRouting {
    /// The message matched a pending request and reached its handler.
    Delivered(RequestHandle),
    /// The message was marked as a reply but had no pending entry
    /// (late, duplicate, cancelled, or malformed). Dropped.
    Discarded,
    /// Not a reply. Ownership returns to the caller for normal dispatch.
    NotAReply(InboundMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CorrelationState {
    Pending,
    Completed,
    Cancelled,
}

struct CorrelationEntry {
    state: CorrelationState,
    // Taken by the terminal transition so the handler can run outside
    // the map lock.
    on_reply: Option<ReplyHandler>,
}

/// A tagged outbound request: the handle to cancel with and the
/// correlation identifier to stamp on the outgoing message.
#[derive(Debug, Clone)]
pub struct TaggedRequest {
    /// Handle for [`ReplyCorrelator::cancel`].
    pub handle: RequestHandle,
    /// Value to place in the outgoing message's correlation field.
    pub correlation_id: String,
}

/// Pending-request table keyed by internal handle.
pub struct ReplyCorrelator {
    pending: DashMap<RequestHandle, CorrelationEntry>,
    handles: IdAllocator,
}

impl ReplyCorrelator {
    /// Empty correlator with a fresh handle arena.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            handles: IdAllocator::new(),
        }
    }

    /// Tag an outgoing request, parking `on_reply` until the reply arrives
    /// or the request is cancelled.
    pub fn tag_request(&self, on_reply: ReplyHandler) -> TaggedRequest {
        let handle = RequestHandle::new(self.handles.allocate());
        let _ = self.pending.insert(
            handle,
            CorrelationEntry {
                state: CorrelationState::Pending,
                on_reply: Some(on_reply),
            },
        );
        gauge!(REPLIES_PENDING).increment(1.0);
        trace!(handle = handle.value(), "request tagged");
        TaggedRequest {
            handle,
            correlation_id: encode_correlation_id(handle),
        }
    }

    /// Classify a correlation identifier without touching the pending table.
    pub fn classify(correlation_id: &str) -> ReplyClassification {
        let Some(suffix) = correlation_id.strip_prefix(REPLY_CORRELATION_PREFIX) else {
            return ReplyClassification::NotAReply;
        };
        // The tag encoding is digits only; a bare `parse` would also admit
        // a leading `+`, which this layer never emits.
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return ReplyClassification::Malformed;
        }
        match suffix.parse::<u64>() {
            Ok(raw) => ReplyClassification::Reply(RequestHandle::new(raw)),
            Err(_) => ReplyClassification::Malformed,
        }
    }

    /// Route one inbound message.
    ///
    /// Non-replies are handed back untouched so the caller can run normal
    /// dispatch; this correlator never swallows a message that is not
    /// addressed to it. Marked messages are consumed here either way:
    /// delivered to the pending handler, or dropped when no Pending entry
    /// matches.
    pub fn route(&self, message: InboundMessage) -> ReplyRouting {
        let classification = match message.correlation_data() {
            Some(correlation_id) => Self::classify(correlation_id),
            None => ReplyClassification::NotAReply,
        };
        let handle = match classification {
            ReplyClassification::NotAReply => return ReplyRouting::NotAReply(message),
            ReplyClassification::Malformed => {
                counter!(REPLY_DROPS_TOTAL, "reason" => "malformed").increment(1);
                debug!(
                    correlation_id = message.correlation_data(),
                    "reply dropped: marker present but handle does not parse"
                );
                return ReplyRouting::Discarded;
            }
            ReplyClassification::Reply(handle) => handle,
        };

        let handler = self.complete(handle);
        match handler {
            Some(on_reply) => {
                on_reply(message);
                ReplyRouting::Delivered(handle)
            }
            None => {
                counter!(REPLY_DROPS_TOTAL, "reason" => "no_pending_entry").increment(1);
                debug!(
                    handle = handle.value(),
                    "reply dropped: no pending request for handle"
                );
                ReplyRouting::Discarded
            }
        }
    }

    /// Cancel a pending request. Returns whether this call performed the
    /// terminal transition; a reply arriving after `cancel` returns true is
    /// discarded.
    pub fn cancel(&self, handle: RequestHandle) -> bool {
        let won = {
            let Some(mut entry) = self.pending.get_mut(&handle) else {
                return false;
            };
            if entry.state != CorrelationState::Pending {
                false
            } else {
                entry.state = CorrelationState::Cancelled;
                let _ = entry.on_reply.take();
                true
            }
            // Guard dropped here; removal below must not run under it.
        };
        if won {
            self.reclaim(handle);
            debug!(handle = handle.value(), "pending request cancelled");
        }
        won
    }

    /// Number of requests still awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending request without invoking handlers. Session
    /// teardown path; returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        gauge!(REPLIES_PENDING).decrement(dropped as f64);
        if dropped > 0 {
            debug!(dropped, "all pending requests cancelled");
        }
        dropped
    }

    /// Perform the Pending -> Completed transition for `handle`, returning
    /// the parked handler if this call won it.
    fn complete(&self, handle: RequestHandle) -> Option<ReplyHandler> {
        let handler = {
            let mut entry = self.pending.get_mut(&handle)?;
            if entry.state != CorrelationState::Pending {
                None
            } else {
                entry.state = CorrelationState::Completed;
                entry.on_reply.take()
            }
            // Guard dropped here; removing the key while holding its guard
            // would deadlock on the shard.
        };
        if handler.is_some() {
            self.reclaim(handle);
        }
        handler
    }

    // Only the transition winner calls this, and handles are never reused,
    // so the removal cannot evict a successor entry.
    fn reclaim(&self, handle: RequestHandle) {
        let _ = self.pending.remove(&handle);
        gauge!(REPLIES_PENDING).decrement(1.0);
    }
}

impl Default for ReplyCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_correlation_id(handle: RequestHandle) -> String {
    // Zero-padded so short handles still yield a fixed-looking tag; the
    // width grows past five digits as handles do, and parsing ignores it.
    format!("{REPLY_CORRELATION_PREFIX}{:05}", handle.value())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn recording_handler() -> (ReplyHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: ReplyHandler = Arc::new(move |msg| {
            let payload = String::from_utf8_lossy(msg.payload()).into_owned();
            sink.lock().unwrap().push(payload);
        });
        (handler, seen)
    }

    fn reply_to(correlation_id: &str) -> InboundMessage {
        InboundMessage::new("pong").with_correlation_data(correlation_id)
    }

    #[test]
    fn tagged_request_encodes_marker_and_handle() {
        let correlator = ReplyCorrelator::new();
        let (handler, _) = recording_handler();
        let tagged = correlator.tag_request(handler);

        assert!(tagged.correlation_id.starts_with(REPLY_CORRELATION_PREFIX));
        assert_eq!(
            ReplyCorrelator::classify(&tagged.correlation_id),
            ReplyClassification::Reply(tagged.handle)
        );
    }

    #[test]
    fn classify_partitions_correlation_values() {
        assert_eq!(
            ReplyCorrelator::classify("#CRP00001"),
            ReplyClassification::Reply(RequestHandle::new(1))
        );
        assert_eq!(
            ReplyCorrelator::classify("#CRP1234567"),
            ReplyClassification::Reply(RequestHandle::new(1_234_567))
        );
        // Marker without a parseable suffix is addressed to us but unusable.
        assert_eq!(ReplyCorrelator::classify("#CRP"), ReplyClassification::Malformed);
        assert_eq!(ReplyCorrelator::classify("#CRPx1"), ReplyClassification::Malformed);
        // A sign would survive u64 parsing but is not our encoding.
        assert_eq!(ReplyCorrelator::classify("#CRP+42"), ReplyClassification::Malformed);
        assert_eq!(ReplyCorrelator::classify("#CRP-42"), ReplyClassification::Malformed);
        // Application-chosen values fall through.
        assert_eq!(ReplyCorrelator::classify("ABCD1234"), ReplyClassification::NotAReply);
        assert_eq!(ReplyCorrelator::classify("#CRQ0001"), ReplyClassification::NotAReply);
        assert_eq!(ReplyCorrelator::classify(""), ReplyClassification::NotAReply);
    }

    #[test]
    fn reply_reaches_handler_exactly_once() {
        let correlator = ReplyCorrelator::new();
        let (handler, seen) = recording_handler();
        let tagged = correlator.tag_request(handler);

        let first = correlator.route(reply_to(&tagged.correlation_id));
        assert_matches!(first, ReplyRouting::Delivered(h) if h == tagged.handle);

        // A duplicate reply with the same correlation ID is dropped.
        let second = correlator.route(reply_to(&tagged.correlation_id));
        assert_matches!(second, ReplyRouting::Discarded);

        assert_eq!(*seen.lock().unwrap(), vec!["pong".to_string()]);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn non_reply_messages_are_handed_back_untouched() {
        let correlator = ReplyCorrelator::new();

        let plain = InboundMessage::new("news").with_correlation_data("order-17");
        let routed = correlator.route(plain);
        assert_matches!(routed, ReplyRouting::NotAReply(msg) => {
            assert_eq!(msg.payload().as_ref(), b"news");
            assert_eq!(msg.correlation_data(), Some("order-17"));
        });

        let untagged = InboundMessage::new("news");
        assert_matches!(correlator.route(untagged), ReplyRouting::NotAReply(_));
    }

    #[test]
    fn malformed_marker_is_consumed_not_passed_on() {
        let correlator = ReplyCorrelator::new();
        let routed = correlator.route(reply_to("#CRPnope"));
        assert_matches!(routed, ReplyRouting::Discarded);
    }

    #[test]
    fn reply_for_unknown_handle_is_discarded() {
        let correlator = ReplyCorrelator::new();
        let routed = correlator.route(reply_to("#CRP00042"));
        assert_matches!(routed, ReplyRouting::Discarded);
    }

    #[test]
    fn sign_prefixed_tag_cannot_reach_a_pending_handler() {
        let correlator = ReplyCorrelator::new();
        let (handler, seen) = recording_handler();
        let tagged = correlator.tag_request(handler);
        assert_eq!(tagged.handle, RequestHandle::new(1));

        // "+1" would decode to handle 1 under a bare parse; it is dropped
        // instead of delivered.
        let routed = correlator.route(reply_to("#CRP+1"));
        assert_matches!(routed, ReplyRouting::Discarded);
        assert!(seen.lock().unwrap().is_empty());

        // The pending entry is untouched; the genuine reply still lands.
        let real = correlator.route(reply_to(&tagged.correlation_id));
        assert_matches!(real, ReplyRouting::Delivered(h) if h == tagged.handle);
        assert_eq!(*seen.lock().unwrap(), vec!["pong".to_string()]);
    }

    #[test]
    fn cancel_wins_over_later_reply() {
        let correlator = ReplyCorrelator::new();
        let (handler, seen) = recording_handler();
        let tagged = correlator.tag_request(handler);

        assert!(correlator.cancel(tagged.handle));
        assert!(!correlator.cancel(tagged.handle));

        let routed = correlator.route(reply_to(&tagged.correlation_id));
        assert_matches!(routed, ReplyRouting::Discarded);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_after_delivery_is_a_no_op() {
        let correlator = ReplyCorrelator::new();
        let (handler, _) = recording_handler();
        let tagged = correlator.tag_request(handler);

        let _ = correlator.route(reply_to(&tagged.correlation_id));
        assert!(!correlator.cancel(tagged.handle));
    }

    #[test]
    fn handles_are_never_reused() {
        let correlator = ReplyCorrelator::new();
        let (a, _) = recording_handler();
        let (b, _) = recording_handler();
        let first = correlator.tag_request(a);
        let _ = correlator.route(reply_to(&first.correlation_id));
        let second = correlator.tag_request(b);
        assert_ne!(first.handle, second.handle);
        assert_ne!(first.correlation_id, second.correlation_id);
    }

    #[test]
    fn racing_replies_deliver_once() {
        let correlator = Arc::new(ReplyCorrelator::new());
        let deliveries = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&deliveries);
        let handler: ReplyHandler = Arc::new(move |_| {
            let _ = sink.fetch_add(1, Ordering::SeqCst);
        });
        let tagged = correlator.tag_request(handler);

        let delivered_count: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let correlator = Arc::clone(&correlator);
                    let correlation_id = tagged.correlation_id.clone();
                    scope.spawn(move || {
                        matches!(
                            correlator.route(reply_to(&correlation_id)),
                            ReplyRouting::Delivered(_)
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(delivered_count, 1);
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn cancel_all_drops_pending_without_invoking_handlers() {
        let correlator = ReplyCorrelator::new();
        let (a, seen_a) = recording_handler();
        let (b, seen_b) = recording_handler();
        let _ = correlator.tag_request(a);
        let _ = correlator.tag_request(b);

        assert_eq!(correlator.cancel_all(), 2);
        assert_eq!(correlator.pending_count(), 0);
        assert!(seen_a.lock().unwrap().is_empty());
        assert!(seen_b.lock().unwrap().is_empty());
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn classify_never_panics(s in "\\PC*") {
                let _ = ReplyCorrelator::classify(&s);
            }

            #[test]
            fn digits_after_marker_always_classify_as_reply(n in 0u64..u64::MAX) {
                let id = format!("{REPLY_CORRELATION_PREFIX}{n}");
                prop_assert_eq!(
                    ReplyCorrelator::classify(&id),
                    ReplyClassification::Reply(RequestHandle::new(n))
                );
            }

            #[test]
            fn sign_prefixed_suffixes_are_malformed(n in 0u64..u64::MAX) {
                let id = format!("{REPLY_CORRELATION_PREFIX}+{n}");
                prop_assert_eq!(
                    ReplyCorrelator::classify(&id),
                    ReplyClassification::Malformed
                );
            }

            #[test]
            fn values_without_marker_fall_through(s in "\\PC*") {
                prop_assume!(!s.starts_with(REPLY_CORRELATION_PREFIX));
                prop_assert_eq!(
                    ReplyCorrelator::classify(&s),
                    ReplyClassification::NotAReply
                );
            }

            #[test]
            fn encoded_tags_round_trip(n in 1u64..u64::MAX) {
                let tag = encode_correlation_id(RequestHandle::new(n));
                prop_assert_eq!(
                    ReplyCorrelator::classify(&tag),
                    ReplyClassification::Reply(RequestHandle::new(n))
                );
            }
        }
    }
}
