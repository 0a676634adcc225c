//! Dispatch registry — the table every receive path resolves through.
//!
//! Maps an opaque [`DispatchId`] to the handler a consumer registered for it.
//! Callback threads look entries up while application threads register and
//! unregister concurrently; the table is sharded so readers never contend
//! with writers on unrelated keys, and no lock is ever held across a handler
//! invocation (lookups hand out a clone of the handler).

use std::sync::Arc;

use courier_core::errors::DispatchError;
use courier_core::ids::{DispatchId, IdAllocator};
use courier_core::message::{CallbackStatus, InboundMessage};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::gauge;
use tracing::trace;

use crate::metrics::DISPATCH_ENTRIES_ACTIVE;

/// Handler a consumer registers for a dispatch ID.
///
/// Invoked on a transport callback thread with ownership of the message;
/// must return promptly. The returned status is handed back to the
/// transport unchanged.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) -> CallbackStatus + Send + Sync>;

/// Concurrency-safe dispatch table plus the arena its IDs come from.
///
/// `unregister` guarantees that once it returns, no *new* invocation of the
/// removed handler can begin; an invocation that already cloned the handler
/// out of the table is allowed to complete.
pub struct DispatchRegistry {
    entries: DashMap<DispatchId, MessageHandler>,
    ids: IdAllocator,
}

impl DispatchRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ids: IdAllocator::new(),
        }
    }

    /// Allocate a fresh dispatch ID.
    ///
    /// IDs are monotonic and never reused, so an ID observed by an in-flight
    /// callback can never alias a later registration.
    pub fn allocate_id(&self) -> DispatchId {
        DispatchId::new(self.ids.allocate())
    }

    /// Bind a handler to a dispatch ID.
    ///
    /// Fails with [`DispatchError::DuplicateDispatchId`] if the ID is
    /// already live; the existing entry is left untouched.
    pub fn register(&self, id: DispatchId, handler: MessageHandler) -> Result<(), DispatchError> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateDispatchId(id)),
            Entry::Vacant(slot) => {
                let _ = slot.insert(handler);
                gauge!(DISPATCH_ENTRIES_ACTIVE).increment(1.0);
                trace!(dispatch_id = id.value(), "dispatch entry registered");
                Ok(())
            }
        }
    }

    /// Remove a handler binding. A no-op (returning `false`) if the ID is
    /// not live — unregistering an already-removed entry is not an error.
    pub fn unregister(&self, id: DispatchId) -> bool {
        if self.entries.remove(&id).is_some() {
            gauge!(DISPATCH_ENTRIES_ACTIVE).decrement(1.0);
            trace!(dispatch_id = id.value(), "dispatch entry removed");
            true
        } else {
            false
        }
    }

    /// Resolve a dispatch ID to its handler.
    ///
    /// Returns a clone so the caller invokes the handler with no table lock
    /// held.
    pub fn lookup(&self, id: DispatchId) -> Option<MessageHandler> {
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning how many were live. Used at session
    /// teardown.
    pub fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        gauge!(DISPATCH_ENTRIES_ACTIVE).decrement(removed as f64);
        removed
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
