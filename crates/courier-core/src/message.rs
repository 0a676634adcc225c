//! Inbound message envelope and transport-facing status codes.
//!
//! The dispatch layer never looks inside a payload. It consults only the
//! metadata fields modelled here: the correlation field (request/reply
//! traffic), the cache-request tag (cache responses), the reply-to topic
//! (request-style sends), and the discard indication set when buffered
//! delivery dropped an adjacent message. Handing a message to a handler
//! moves ownership of the whole envelope; the handler drops it when done.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::CacheRequestId;

/// Status returned to the transport from every receive callback.
///
/// `Consumed` covers both successful delivery and deliberate discard; the
/// transport must not re-deliver or escalate either. `Passthrough` means
/// this layer did not handle the message and the transport's default
/// handling applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    /// The message was delivered to a handler or deliberately dropped.
    Consumed,
    /// The message was not handled here.
    Passthrough,
}

/// An inbound message as delivered by the transport.
///
/// Payload bytes are opaque. Metadata accessors return what the transport
/// decoded from the wire; absent fields were absent on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    payload: Bytes,
    destination: Option<String>,
    reply_to: Option<String>,
    correlation_data: Option<String>,
    cache_request_id: Option<CacheRequestId>,
    discard_indication: bool,
}

impl InboundMessage {
    /// Envelope around an opaque payload with no metadata set.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            destination: None,
            reply_to: None,
            correlation_data: None,
            cache_request_id: None,
            discard_indication: false,
        }
    }

    /// Set the destination topic the transport matched.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Set the reply-to topic carried by a request-style message.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set the correlation field.
    #[must_use]
    pub fn with_correlation_data(mut self, correlation: impl Into<String>) -> Self {
        self.correlation_data = Some(correlation.into());
        self
    }

    /// Set the echoed cache-request tag.
    #[must_use]
    pub fn with_cache_request_id(mut self, id: CacheRequestId) -> Self {
        self.cache_request_id = Some(id);
        self
    }

    /// The opaque payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the envelope, keeping only the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Destination topic, when the transport provided one.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Reply-to topic, present on request-style messages.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Raw correlation field, if any.
    pub fn correlation_data(&self) -> Option<&str> {
        self.correlation_data.as_deref()
    }

    /// Cache-request tag echoed by the transport, if any.
    pub fn cache_request_id(&self) -> Option<CacheRequestId> {
        self.cache_request_id
    }

    /// Whether an adjacent message was dropped by buffered delivery
    /// before this one was observed.
    pub fn has_discard_indication(&self) -> bool {
        self.discard_indication
    }

    /// Flag that an adjacent message was dropped. Set by the receive
    /// buffer, never by the transport.
    pub fn set_discard_indication(&mut self) {
        self.discard_indication = true;
    }
}
