//! Cache request correlation and response filtering.
//!
//! A cache request is answered asynchronously: zero or more tagged response
//! messages, then exactly one completion event. Responses can race with
//! cancellation, and overlapping requests on shared topics can put another
//! request's responses in front of this one's delivery context, so every
//! response is filtered strictly by identity before it is forwarded — a
//! response whose tag does not match the entry for its delivery context is
//! dropped with a neutral status, never delivered to the wrong handler.
//!
//! Discards here are policy, not failure. Each discard path has its own
//! counter label so the drop volume is observable even though nothing is
//! surfaced to the application.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use courier_core::errors::DispatchError;
use courier_core::events::CacheEvent;
use courier_core::ids::{CacheRequestId, DispatchId};
use courier_core::message::{CallbackStatus, InboundMessage};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use tracing::debug;

use crate::metrics::{CACHE_FILTER_DROPS_TOTAL, CACHE_REQUESTS_OUTSTANDING};

/// Ceiling on concurrently outstanding cache requests unless overridden.
pub const DEFAULT_MAX_OUTSTANDING: usize = 1024;

/// Handler receiving a filtered cache response plus the caller identifier
/// of the request it belongs to. Invoked on a transport callback thread;
/// must return promptly.
pub type CacheMessageHandler = Arc<dyn Fn(InboundMessage, DispatchId) + Send + Sync>;

/// Handler receiving the single completion event of a cache request, plus
/// the request's caller identifier.
pub type CacheCompletionHandler = Arc<dyn Fn(CacheEvent, DispatchId) + Send + Sync>;

struct CacheRequestEntry {
    dispatch_id: DispatchId,
    on_message: CacheMessageHandler,
    on_complete: CacheCompletionHandler,
}

/// Table of outstanding cache requests keyed by the application-chosen
/// request identifier.
///
/// At most one entry is live per identifier; id reuse is only possible
/// after the previous request completed or was cancelled.
pub struct CacheCorrelator {
    outstanding: DashMap<CacheRequestId, CacheRequestEntry>,
    in_flight: AtomicUsize,
    max_outstanding: usize,
}

impl CacheCorrelator {
    /// Correlator with the default outstanding-request ceiling.
    pub fn new() -> Self {
        Self::with_max_outstanding(DEFAULT_MAX_OUTSTANDING)
    }

    /// Correlator with an explicit outstanding-request ceiling.
    pub fn with_max_outstanding(max_outstanding: usize) -> Self {
        Self {
            outstanding: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            max_outstanding,
        }
    }

    /// Register an outstanding cache request.
    ///
    /// Fails with [`DispatchError::DuplicateCacheRequestId`] if the ID
    /// already has a live entry, or [`DispatchError::CacheRequestLimit`]
    /// when the ceiling is reached.
    pub fn register(
        &self,
        id: CacheRequestId,
        dispatch_id: DispatchId,
        on_message: CacheMessageHandler,
        on_complete: CacheCompletionHandler,
    ) -> Result<(), DispatchError> {
        // Claim a slot first, then roll the claim back on any failure, so
        // the ceiling holds under concurrent registration.
        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= self.max_outstanding {
            let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::CacheRequestLimit(self.max_outstanding));
        }
        match self.outstanding.entry(id) {
            Entry::Occupied(_) => {
                let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(DispatchError::DuplicateCacheRequestId(id))
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(CacheRequestEntry {
                    dispatch_id,
                    on_message,
                    on_complete,
                });
                gauge!(CACHE_REQUESTS_OUTSTANDING).increment(1.0);
                debug!(
                    cache_request_id = id.value(),
                    dispatch_id = dispatch_id.value(),
                    "cache request registered"
                );
                Ok(())
            }
        }
    }

    /// Filter and deliver a cache response arriving in the delivery context
    /// of `context_id`.
    ///
    /// The message is forwarded only when it carries a cache-request tag and
    /// that tag names the live entry for this context. Everything else is
    /// discarded with a neutral status: an untagged message cannot be
    /// matched, a foreign tag belongs to an overlapping request, and a
    /// missing entry means the request was cancelled or already completed.
    pub fn on_cache_message(
        &self,
        context_id: CacheRequestId,
        message: InboundMessage,
    ) -> CallbackStatus {
        let Some(tag) = message.cache_request_id() else {
            counter!(CACHE_FILTER_DROPS_TOTAL, "reason" => "untagged").increment(1);
            debug!(
                context_id = context_id.value(),
                "cache response dropped: no cache-request tag"
            );
            return CallbackStatus::Consumed;
        };
        if tag != context_id {
            counter!(CACHE_FILTER_DROPS_TOTAL, "reason" => "foreign_tag").increment(1);
            debug!(
                context_id = context_id.value(),
                tag = tag.value(),
                "cache response dropped: tag belongs to another request"
            );
            return CallbackStatus::Consumed;
        }
        let target = self
            .outstanding
            .get(&context_id)
            .map(|entry| (Arc::clone(&entry.on_message), entry.dispatch_id));
        match target {
            Some((on_message, dispatch_id)) => {
                on_message(message, dispatch_id);
            }
            None => {
                counter!(CACHE_FILTER_DROPS_TOTAL, "reason" => "no_entry").increment(1);
                debug!(
                    context_id = context_id.value(),
                    "cache response dropped: request cancelled or completed"
                );
            }
        }
        CallbackStatus::Consumed
    }

    /// Deliver the completion event for an outstanding request.
    ///
    /// Removes the entry first, so the completion handler runs exactly once
    /// and any response racing in behind the event finds no entry. A
    /// completion for an unknown request is discarded.
    pub fn on_cache_event(&self, event: CacheEvent) {
        match self.take(event.cache_request_id) {
            Some(entry) => {
                debug!(
                    cache_request_id = event.cache_request_id.value(),
                    outcome = ?event.outcome,
                    "cache request completed"
                );
                (entry.on_complete)(event, entry.dispatch_id);
            }
            None => {
                counter!(CACHE_FILTER_DROPS_TOTAL, "reason" => "orphan_completion").increment(1);
                debug!(
                    cache_request_id = event.cache_request_id.value(),
                    "cache completion dropped: request cancelled or unknown"
                );
            }
        }
    }

    /// Cancel an outstanding request.
    ///
    /// Removal is atomic: a response or completion arriving after `cancel`
    /// returns finds no entry and is discarded. Returns whether an entry
    /// was live.
    pub fn cancel(&self, id: CacheRequestId) -> bool {
        let cancelled = self.take(id).is_some();
        if cancelled {
            debug!(cache_request_id = id.value(), "cache request cancelled");
        }
        cancelled
    }

    /// Number of outstanding requests.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Cancel every outstanding request, returning how many were live.
    /// Used at session teardown.
    pub fn cancel_all(&self) -> usize {
        let removed = self.outstanding.len();
        self.outstanding.clear();
        let _ = self.in_flight.fetch_sub(removed, Ordering::SeqCst);
        gauge!(CACHE_REQUESTS_OUTSTANDING).decrement(removed as f64);
        removed
    }

    fn take(&self, id: CacheRequestId) -> Option<CacheRequestEntry> {
        let (_, entry) = self.outstanding.remove(&id)?;
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        gauge!(CACHE_REQUESTS_OUTSTANDING).decrement(1.0);
        Some(entry)
    }
}

impl Default for CacheCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
