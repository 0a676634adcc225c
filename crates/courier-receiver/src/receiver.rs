//! Buffered direct message receiver.
//!
//! [`DirectReceiver`] turns the dispatch core's callback-style delivery
//! into application-friendly consumption. On start it registers a dispatch
//! entry that enqueues into a bounded [`MessageBuffer`] and subscribes its
//! configured topics; the application then consumes either by awaiting
//! [`receive`](DirectReceiver::receive) or by installing a message callback
//! serviced from a dedicated worker task. The enqueue handler returns
//! immediately, so a slow application never stalls the transport's
//! callback thread; overload is absorbed by the buffer's drop strategy.
//!
//! Lifecycle: NotStarted → Starting → Started → Terminating → Terminated,
//! one way only. Graceful termination unsubscribes, removes the dispatch
//! entry, then gives buffered messages a grace period to drain; whatever
//! remains is counted and surfaced as an incomplete-delivery error. A
//! session-down event terminates without grace and notifies the optional
//! termination listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::events::{SessionEvent, SessionEventKind};
use courier_core::ids::DispatchId;
use courier_core::message::{CallbackStatus, InboundMessage};
use courier_dispatch::registry::MessageHandler;
use courier_dispatch::session::SessionDispatch;
use courier_dispatch::subscriptions::SubscriptionOutcome;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::buffer::MessageBuffer;
use crate::config::ReceiverConfig;
use crate::errors::ReceiverError;
use crate::subscription::SubscriptionService;

/// Lifecycle states of a [`DirectReceiver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverState {
    /// Constructed, not yet started.
    NotStarted = 0,
    /// `start` is registering and subscribing.
    Starting = 1,
    /// Delivering messages.
    Started = 2,
    /// Termination in progress, buffer draining.
    Terminating = 3,
    /// Done. Terminal.
    Terminated = 4,
}

impl ReceiverState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

/// Notification that a receiver terminated without a graceful request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationEvent {
    /// When the termination happened.
    pub timestamp: DateTime<Utc>,
    /// Why, e.g. `session down`.
    pub reason: String,
    /// Buffered messages discarded by the termination.
    pub undelivered: usize,
}

/// Application callback for callback-style consumption. Runs on the
/// receiver's worker task, not on a transport thread, so it may do real
/// work between messages.
pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Listener for unsolicited terminations.
pub type TerminationListener = Arc<dyn Fn(TerminationEvent) + Send + Sync>;

/// A started receiver's handle to its buffered message stream.
pub struct DirectReceiver {
    dispatch: Arc<SessionDispatch>,
    subscriptions: Arc<dyn SubscriptionService>,
    config: ReceiverConfig,
    buffer: Arc<MessageBuffer>,
    state: AtomicU8,
    dispatch_id: RwLock<Option<DispatchId>>,
    callback: Arc<RwLock<Option<MessageCallback>>>,
    callback_installed: Arc<Notify>,
    termination_listener: RwLock<Option<TerminationListener>>,
    cancel: CancellationToken,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    // Undelivered count of the first termination; later terminate calls
    // report this same outcome.
    first_outcome: Mutex<Option<usize>>,
    termination_done: Notify,
}

impl DirectReceiver {
    /// Receiver over `dispatch`, subscribing through `subscriptions`.
    /// Invalid config values are corrected per [`ReceiverConfig::validate`].
    pub fn new(
        dispatch: Arc<SessionDispatch>,
        subscriptions: Arc<dyn SubscriptionService>,
        mut config: ReceiverConfig,
    ) -> Self {
        config.validate();
        let buffer = Arc::new(MessageBuffer::new(config.buffer_capacity, config.backpressure));
        Self {
            dispatch,
            subscriptions,
            config,
            buffer,
            state: AtomicU8::new(ReceiverState::NotStarted as u8),
            dispatch_id: RwLock::new(None),
            callback: Arc::new(RwLock::new(None)),
            callback_installed: Arc::new(Notify::new()),
            termination_listener: RwLock::new(None),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            first_outcome: Mutex::new(None),
            termination_done: Notify::new(),
        }
    }

    /// Receiver over its own freshly built dispatch core, with the cache
    /// ceiling taken from `config`. For embeddings hosting a single
    /// receiver; the core stays reachable through
    /// [`dispatch`](Self::dispatch) for transport wiring.
    pub fn with_new_dispatch(
        subscriptions: Arc<dyn SubscriptionService>,
        config: ReceiverConfig,
    ) -> Self {
        let dispatch = Arc::new(SessionDispatch::with_cache_limit(
            config.max_outstanding_cache_requests,
        ));
        Self::new(dispatch, subscriptions, config)
    }

    /// The dispatch core this receiver enqueues through. Transport glue
    /// delivers its callbacks here.
    pub fn dispatch(&self) -> &Arc<SessionDispatch> {
        &self.dispatch
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReceiverState {
        ReceiverState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The dispatch ID this receiver's enqueue handler is registered
    /// under, once started.
    pub fn dispatch_id(&self) -> Option<DispatchId> {
        *self.dispatch_id.read()
    }

    /// Install the callback for callback-style consumption. May be called
    /// before or after `start`; the worker task picks it up either way.
    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.callback.write() = Some(callback);
        self.callback_installed.notify_waiters();
    }

    /// Install the listener notified on unsolicited termination.
    pub fn set_termination_listener(&self, listener: TerminationListener) {
        *self.termination_listener.write() = Some(listener);
    }

    /// Register the enqueue handler and subscribe the configured topics.
    ///
    /// Fails with [`ReceiverError::SubscriptionRefused`] if the transport
    /// refuses any topic; already-confirmed topics are unsubscribed again
    /// and the receiver ends up Terminated. A dispatch-ID collision on a
    /// shared dispatch core fails the same way, leaving the colliding
    /// owner's entry untouched. `start` on a receiver that already left
    /// NotStarted is a contract error.
    #[instrument(skip(self), fields(topics = self.config.topics.len()))]
    pub async fn start(&self) -> Result<(), ReceiverError> {
        self.transition(ReceiverState::NotStarted, ReceiverState::Starting)
            .map_err(|observed| match observed {
                ReceiverState::Terminated => ReceiverError::Terminated,
                _ => ReceiverError::AlreadyStarted,
            })?;

        let dispatch_id = self.dispatch.registry().allocate_id();
        let handler: MessageHandler = {
            let buffer = Arc::clone(&self.buffer);
            Arc::new(move |message| {
                let _ = buffer.push(message);
                CallbackStatus::Consumed
            })
        };
        if let Err(err) = self.dispatch.registry().register(dispatch_id, handler) {
            // The colliding entry belongs to another owner on the shared
            // dispatch core; abort without touching it.
            self.abort_start(dispatch_id);
            return Err(err.into());
        }
        *self.dispatch_id.write() = Some(dispatch_id);

        let mut confirmed: Vec<String> = Vec::with_capacity(self.config.topics.len());
        for topic in &self.config.topics {
            let outcome = self.subscriptions.subscribe(topic, dispatch_id).await;
            match outcome {
                Ok(SubscriptionOutcome::Confirmed) => {
                    debug!(topic, dispatch_id = dispatch_id.value(), "subscription confirmed");
                    confirmed.push(topic.clone());
                }
                Ok(SubscriptionOutcome::Rejected {
                    response_code,
                    info,
                }) => {
                    self.rollback_start(dispatch_id, &confirmed);
                    return Err(ReceiverError::SubscriptionRefused {
                        topic: topic.clone(),
                        detail: format!("{info} (code {response_code})"),
                    });
                }
                Err(_) => {
                    self.rollback_start(dispatch_id, &confirmed);
                    return Err(ReceiverError::SubscriptionRefused {
                        topic: topic.clone(),
                        detail: "confirmation channel closed".to_string(),
                    });
                }
            }
        }

        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.buffer),
            Arc::clone(&self.callback),
            Arc::clone(&self.callback_installed),
            self.cancel.clone(),
        ));
        *self.worker.lock() = Some(worker);

        self.set_state(ReceiverState::Started);
        info!(
            dispatch_id = dispatch_id.value(),
            topics = self.config.topics.len(),
            buffer_capacity = self.config.buffer_capacity,
            "receiver started"
        );
        Ok(())
    }

    /// Await the next buffered message, up to `timeout`.
    ///
    /// Allowed while Terminating so a consumer can participate in the
    /// drain; returns [`ReceiverError::Terminated`] once the receiver is
    /// terminated and the buffer is empty.
    pub async fn receive(&self, timeout: Duration) -> Result<InboundMessage, ReceiverError> {
        if matches!(
            self.state(),
            ReceiverState::NotStarted | ReceiverState::Starting
        ) {
            return Err(ReceiverError::NotStarted);
        }
        match tokio::time::timeout(timeout, self.buffer.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(ReceiverError::Terminated),
            Err(_) => Err(ReceiverError::ReceiveTimeout),
        }
    }

    /// Terminate gracefully.
    ///
    /// Unsubscribes, removes the dispatch entry (after which no new
    /// enqueue can begin), then gives consumers up to `grace` to drain the
    /// buffer. Messages still buffered at expiry are discarded and
    /// reported as [`ReceiverError::IncompleteDelivery`]. A second call
    /// waits for the first and returns the same outcome.
    #[instrument(skip(self))]
    pub async fn terminate(&self, grace: Duration) -> Result<(), ReceiverError> {
        match self.transition(ReceiverState::Started, ReceiverState::Terminating) {
            Ok(()) => {}
            Err(ReceiverState::NotStarted | ReceiverState::Starting) => {
                return Err(ReceiverError::NotStarted);
            }
            Err(_) => {
                self.await_terminated().await;
                return self.stored_outcome();
            }
        }

        if let Some(dispatch_id) = *self.dispatch_id.read() {
            for topic in &self.config.topics {
                // Confirmation is not awaited: termination does not depend
                // on the transport acknowledging the unsubscribe.
                let _ = self.subscriptions.unsubscribe(topic, dispatch_id);
            }
            let _ = self.dispatch.registry().unregister(dispatch_id);
        }
        self.buffer.close();

        let drained = tokio::time::timeout(grace, self.buffer.drained()).await.is_ok();
        let undelivered = if drained {
            0
        } else {
            self.buffer.discard_remaining()
        };
        if undelivered > 0 {
            counter!("receiver_termination_discards_total").increment(undelivered as u64);
            warn!(undelivered, "grace period expired with messages undelivered");
        }

        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        self.finish_termination(undelivered);
        info!(undelivered, "receiver terminated");
        self.stored_outcome()
    }

    /// React to a session lifecycle event. A session-down event terminates
    /// the receiver immediately, with zero grace.
    pub fn handle_session_event(&self, event: &SessionEvent) {
        if event.kind == SessionEventKind::DownError {
            self.unsolicited_terminate("session down");
        }
    }

    fn unsolicited_terminate(&self, reason: &str) {
        if self
            .transition(ReceiverState::Started, ReceiverState::Terminating)
            .is_err()
        {
            return;
        }
        if let Some(dispatch_id) = *self.dispatch_id.read() {
            let _ = self.dispatch.registry().unregister(dispatch_id);
        }
        self.buffer.close();
        let undelivered = self.buffer.discard_remaining();
        if undelivered > 0 {
            counter!("receiver_termination_discards_total").increment(undelivered as u64);
        }
        self.cancel.cancel();
        self.finish_termination(undelivered);
        warn!(reason, undelivered, "receiver terminated without request");

        let listener = self.termination_listener.read().clone();
        if let Some(listener) = listener {
            listener(TerminationEvent {
                timestamp: Utc::now(),
                reason: reason.to_string(),
                undelivered,
            });
        }
    }

    fn rollback_start(&self, dispatch_id: DispatchId, confirmed: &[String]) {
        for topic in confirmed {
            let _ = self.subscriptions.unsubscribe(topic, dispatch_id);
        }
        let _ = self.dispatch.registry().unregister(dispatch_id);
        self.abort_start(dispatch_id);
    }

    // Terminal cleanup for a start that cannot proceed. Leaves the receiver
    // Terminated with a clean outcome; never unregisters, the caller owns
    // that decision.
    fn abort_start(&self, dispatch_id: DispatchId) {
        self.buffer.close();
        let _ = self.buffer.discard_remaining();
        self.finish_termination(0);
        warn!(dispatch_id = dispatch_id.value(), "start rolled back");
    }

    fn finish_termination(&self, undelivered: usize) {
        *self.first_outcome.lock() = Some(undelivered);
        self.set_state(ReceiverState::Terminated);
        self.termination_done.notify_waiters();
    }

    fn stored_outcome(&self) -> Result<(), ReceiverError> {
        match *self.first_outcome.lock() {
            Some(undelivered) if undelivered > 0 => {
                Err(ReceiverError::IncompleteDelivery { undelivered })
            }
            _ => Ok(()),
        }
    }

    async fn await_terminated(&self) {
        loop {
            let done = self.termination_done.notified();
            if self.state() == ReceiverState::Terminated {
                return;
            }
            done.await;
        }
    }

    fn transition(&self, from: ReceiverState, to: ReceiverState) -> Result<(), ReceiverState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ReceiverState::from_u8)
    }

    fn set_state(&self, to: ReceiverState) {
        self.state.store(to as u8, Ordering::SeqCst);
    }
}

/// Services the installed message callback from the buffer. Parks while no
/// callback is installed; exits when cancelled or when the buffer is
/// closed and drained.
async fn run_worker(
    buffer: Arc<MessageBuffer>,
    callback: Arc<RwLock<Option<MessageCallback>>>,
    installed: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let current = callback.read().clone();
        match current {
            None => {
                let installed = installed.notified();
                if callback.read().is_some() {
                    continue;
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = installed => {}
                }
            }
            Some(current) => {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    message = buffer.recv() => match message {
                        Some(message) => current(message),
                        None => return,
                    }
                }
            }
        }
    }
}
