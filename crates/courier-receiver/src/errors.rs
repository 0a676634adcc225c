//! Receiver error taxonomy.

use courier_core::errors::DispatchError;

/// Errors surfaced by the buffered receiver.
///
/// Backpressure drops and in-flight races are not here: those are policy,
/// reported through counters and the discard indication on messages. These
/// variants are contract violations or terminal conditions the caller must
/// handle.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    /// An operation that requires a started receiver ran before `start`.
    #[error("receiver has not been started")]
    NotStarted,

    /// `start` was called on a receiver that already left the NotStarted
    /// state.
    #[error("receiver was already started")]
    AlreadyStarted,

    /// The receiver is terminated and its buffer is drained.
    #[error("receiver is terminated")]
    Terminated,

    /// `receive` hit its caller-supplied timeout with no message available.
    #[error("receive timed out")]
    ReceiveTimeout,

    /// The transport refused a subscription during startup.
    #[error("subscription refused for {topic}: {detail}")]
    SubscriptionRefused {
        /// Topic the transport refused.
        topic: String,
        /// Detail from the transport's rejection event.
        detail: String,
    },

    /// Termination expired its grace period with messages still buffered.
    #[error("{undelivered} messages undelivered at termination")]
    IncompleteDelivery {
        /// Messages discarded when the grace period expired.
        undelivered: usize,
    },

    /// A dispatch-layer contract violation during start or teardown.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
