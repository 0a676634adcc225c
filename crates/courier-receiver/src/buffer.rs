//! Bounded receive buffer between callback threads and consumers.
//!
//! The producer side is synchronous (called from a transport callback
//! thread, must return promptly); the consumer side is async. Capacity is
//! fixed at construction, and when it is exceeded the configured
//! backpressure strategy drops a message rather than blocking the callback
//! thread. Every drop is counted and leaves a discard indication on an
//! adjacent message so the application can see the gap:
//!
//! - **DropOldest** evicts the head; the message delivered next carries the
//!   indication.
//! - **DropLatest** rejects the arrival; the next message that does get in
//!   carries the indication.
//!
//! After [`close`](MessageBuffer::close) the buffer rejects new messages
//! but keeps serving buffered ones; [`recv`](MessageBuffer::recv) returns
//! `None` once a closed buffer is empty.

use std::collections::VecDeque;

use courier_core::message::InboundMessage;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::BackpressureStrategy;

struct BufferInner {
    queue: VecDeque<InboundMessage>,
    closed: bool,
    // DropLatest left a gap; the next admitted message gets flagged.
    flag_next_enqueue: bool,
}

/// Fixed-capacity FIFO with drop-based backpressure.
pub struct MessageBuffer {
    inner: Mutex<BufferInner>,
    readable: Notify,
    drained: Notify,
    capacity: usize,
    strategy: BackpressureStrategy,
}

impl MessageBuffer {
    /// Buffer holding at most `capacity` messages.
    pub fn new(capacity: usize, strategy: BackpressureStrategy) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                flag_next_enqueue: false,
            }),
            readable: Notify::new(),
            drained: Notify::new(),
            capacity,
            strategy,
        }
    }

    /// Enqueue a message, applying backpressure when full. Returns whether
    /// the message was admitted. Never blocks.
    pub fn push(&self, mut message: InboundMessage) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!("message arrived after buffer close, dropped");
            return false;
        }
        if inner.queue.len() >= self.capacity {
            match self.strategy {
                BackpressureStrategy::DropOldest => {
                    // A zero-capacity buffer has no head to evict; only a
                    // real eviction counts and flags.
                    let evicted = inner.queue.pop_front().is_some();
                    inner.queue.push_back(message);
                    if evicted {
                        counter!(
                            "receiver_backpressure_discards_total",
                            "strategy" => self.strategy.as_label()
                        )
                        .increment(1);
                        // The gap sits in front of whatever is delivered next.
                        if let Some(front) = inner.queue.front_mut() {
                            front.set_discard_indication();
                        }
                    }
                    drop(inner);
                    self.readable.notify_one();
                    return true;
                }
                BackpressureStrategy::DropLatest => {
                    counter!(
                        "receiver_backpressure_discards_total",
                        "strategy" => self.strategy.as_label()
                    )
                    .increment(1);
                    inner.flag_next_enqueue = true;
                    return false;
                }
            }
        }
        if inner.flag_next_enqueue {
            message.set_discard_indication();
            inner.flag_next_enqueue = false;
        }
        inner.queue.push_back(message);
        drop(inner);
        self.readable.notify_one();
        true
    }

    /// Dequeue the oldest message, waiting until one arrives. Returns
    /// `None` once the buffer is closed and drained.
    pub async fn recv(&self) -> Option<InboundMessage> {
        loop {
            // Register interest before checking, so a push between the
            // check and the await still wakes us.
            let readable = self.readable.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(message) = inner.queue.pop_front() {
                    if inner.queue.is_empty() {
                        self.drained.notify_waiters();
                    }
                    return Some(message);
                }
                if inner.closed {
                    return None;
                }
            }
            readable.await;
        }
    }

    /// Stop admitting messages. Buffered messages remain consumable.
    pub fn close(&self) {
        let empty = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.queue.is_empty()
        };
        self.readable.notify_waiters();
        if empty {
            self.drained.notify_waiters();
        }
    }

    /// Wait until the buffer is empty. Intended for termination drains,
    /// typically wrapped in a timeout.
    pub async fn drained(&self) {
        loop {
            let drained = self.drained.notified();
            {
                let inner = self.inner.lock();
                if inner.queue.is_empty() {
                    return;
                }
            }
            drained.await;
        }
    }

    /// Throw away everything still buffered, returning the count.
    pub fn discard_remaining(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            let discarded = inner.queue.len();
            inner.queue.clear();
            discarded
        };
        if discarded > 0 {
            self.drained.notify_waiters();
            self.readable.notify_waiters();
        }
        discarded
    }

    /// Messages currently buffered.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
