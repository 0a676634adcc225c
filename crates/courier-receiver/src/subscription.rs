//! Seam between the receiver and the transport's subscription machinery.

use courier_core::ids::DispatchId;
use courier_dispatch::SubscriptionOutcome;
use tokio::sync::oneshot;

/// Issues subscribe/unsubscribe operations against the transport.
///
/// Implementations attach a fresh correlation tag to each operation (the
/// [`SubscriptionTracker`](courier_dispatch::SubscriptionTracker) does the
/// bookkeeping) and hand back the receiver that resolves when the transport
/// echoes the tag. A receiver whose channel closes without an outcome means
/// the session tore down mid-operation; callers treat that as a refusal.
///
/// Both calls are issued from async context but must not block: the wait
/// happens on the returned channel, not in the call.
pub trait SubscriptionService: Send + Sync {
    /// Ask the transport to deliver messages matching `topic` to the
    /// dispatch entry `dispatch_id`.
    fn subscribe(&self, topic: &str, dispatch_id: DispatchId)
    -> oneshot::Receiver<SubscriptionOutcome>;

    /// Remove a subscription previously added with [`subscribe`].
    ///
    /// [`subscribe`]: SubscriptionService::subscribe
    fn unsubscribe(
        &self,
        topic: &str,
        dispatch_id: DispatchId,
    ) -> oneshot::Receiver<SubscriptionOutcome>;
}
