//! Contract-violation errors surfaced by the dispatch layer.
//!
//! Only programming-contract violations become errors: duplicate
//! registrations, exceeding the outstanding-request ceiling, or naming a
//! flow that was never bound. Benign races (a message for an unregistered
//! target, a late or duplicate reply, a response to a cancelled request)
//! are deliberately not represented here — those paths discard the message
//! and return a neutral status to the transport instead.

use thiserror::Error;

use crate::ids::{CacheRequestId, DispatchId, FlowId};

/// Errors returned to a caller that violated a registration contract.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatch ID is already bound to a live handler.
    #[error("dispatch id {0} is already registered")]
    DuplicateDispatchId(DispatchId),

    /// The cache request ID already has an outstanding request on this
    /// session.
    #[error("cache request id {0} already has an outstanding request")]
    DuplicateCacheRequestId(CacheRequestId),

    /// Too many cache requests are outstanding at once.
    #[error("outstanding cache request limit of {0} reached")]
    CacheRequestLimit(usize),

    /// The flow ID does not name a bound flow.
    #[error("flow {0} is not bound")]
    UnknownFlow(FlowId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_identifier() {
        let err = DispatchError::DuplicateDispatchId(DispatchId::new(17));
        assert_eq!(err.to_string(), "dispatch id 17 is already registered");

        let err = DispatchError::DuplicateCacheRequestId(CacheRequestId::new(4));
        assert_eq!(
            err.to_string(),
            "cache request id 4 already has an outstanding request"
        );

        let err = DispatchError::CacheRequestLimit(1024);
        assert_eq!(err.to_string(), "outstanding cache request limit of 1024 reached");

        let err = DispatchError::UnknownFlow(FlowId::new(2));
        assert_eq!(err.to_string(), "flow 2 is not bound");
    }
}
