//! # Lifecycle Subscription Manager
//!
//! Keeps two independent log subscriptions open against the contract:
//!
//! | Stream | Feed entry | Refresh |
//! |--------|------------|---------|
//! | `RiddleSet` | every notification | text and open flag |
//! | `AnswerAttempt` | every notification, `(you)` for the session identity | open flag, when `correct` |
//!
//! ## Cancellation
//!
//! Each subscription owns a gate. Notifications are handled synchronously
//! while holding the gate lock, and [`SubscriptionHandle::unsubscribe`]
//! closes the gate under the same lock. Once `unsubscribe` returns, the
//! subscription never touches the feed again. Refreshes already spawned
//! may still complete and update the state channel.
//!
//! ## Refreshes
//!
//! Refreshes run in the background and may finish out of order. For each
//! field only the most recently issued read publishes; older results are
//! discarded.
//!
//! ## Transport failures
//!
//! Errors delivered in-band by the transport become `Diagnostic` feed
//! entries and the subscription stays active; reconnecting is the
//! transport's job. When the transport ends the stream, a final diagnostic
//! is appended and the subscription becomes unsubscribed. It is not
//! reopened automatically.

use super::reader::PuzzleReader;
use crate::abi::{LogDecoder, LogSchema};
use crate::domain::entities::{Identity, LogFilter, PuzzleState, RawLog};
use crate::domain::events::{names, DecodedEvent, EventFeed, FeedEntry, FeedSource};
use crate::errors::{LedgerError, RemoteReadError, SubscriptionTransportError};
use crate::ports::outbound::{CancelToken, NotificationSource, TransportEvent};
use parking_lot::Mutex;
use riddle_telemetry::{NOTIFICATIONS, STATE_REFRESHES, TRANSPORT_ERRORS};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// =============================================================================
// STREAMS & STATES
// =============================================================================

/// The two lifecycle notification streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStream {
    RiddleSet,
    AnswerAttempt,
}

impl LifecycleStream {
    /// Event name in the contract ABI.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::RiddleSet => names::RIDDLE_SET,
            Self::AnswerAttempt => names::ANSWER_ATTEMPT,
        }
    }

    fn feed_source(self) -> FeedSource {
        match self {
            Self::RiddleSet => FeedSource::RiddleSet,
            Self::AnswerAttempt => FeedSource::AnswerAttempt,
        }
    }
}

impl fmt::Display for LifecycleStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Per-subscription lifecycle. `Unsubscribed` is reusable: the stream may
/// be opened again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Active,
}

/// Feed text for a transport problem on `stream`.
fn diagnostic(stream: LifecycleStream, detail: &dyn fmt::Display) -> FeedEntry {
    FeedEntry::new(
        FeedSource::Diagnostic,
        format!("Error watching {stream} event: {detail}"),
    )
}

// =============================================================================
// GATE
// =============================================================================

/// Open/closed flag serializing delivery against cancellation.
#[derive(Debug, Clone)]
struct Gate(Arc<Mutex<bool>>);

impl Gate {
    fn open() -> Self {
        Self(Arc::new(Mutex::new(true)))
    }

    fn is_open(&self) -> bool {
        *self.0.lock()
    }

    /// Runs `f` while holding the lock, if open. Returns whether it ran.
    fn run(&self, f: impl FnOnce()) -> bool {
        let open = self.0.lock();
        if *open {
            f();
        }
        *open
    }

    /// Closes the gate, running `f` first under the lock if it was open.
    /// Returns whether this call closed it.
    fn close_with(&self, f: impl FnOnce()) -> bool {
        let mut open = self.0.lock();
        if !*open {
            return false;
        }
        f();
        *open = false;
        true
    }
}

// =============================================================================
// REFRESHER
// =============================================================================

/// Count of reads issued for one state field. Only the newest read may
/// publish its result.
#[derive(Debug, Clone, Default)]
struct Generation(Arc<AtomicU64>);

impl Generation {
    fn issue(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, issued: u64) -> bool {
        self.0.load(Ordering::SeqCst) == issued
    }
}

/// Fire-and-forget re-reads of puzzle state into a watch channel.
///
/// Reads of the same field may complete out of order; a result is
/// published only if no newer read of that field was issued meanwhile.
/// The check runs under the channel's write lock, so a superseded read can
/// never overwrite a newer one.
#[derive(Clone)]
struct Refresher {
    reader: Arc<PuzzleReader>,
    state: Arc<watch::Sender<PuzzleState>>,
    text_issued: Generation,
    open_issued: Generation,
}

impl Refresher {
    fn new(reader: Arc<PuzzleReader>) -> Self {
        let (state, _) = watch::channel(PuzzleState::default());
        Self {
            reader,
            state: Arc::new(state),
            text_issued: Generation::default(),
            open_issued: Generation::default(),
        }
    }

    fn refresh_all(&self) {
        self.refresh_text();
        self.refresh_open_flag();
    }

    fn refresh_text(&self) {
        let issued = self.text_issued.issue();
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.reader.read_puzzle_text().await;
            record("text", &result);
            if let Ok(text) = result {
                this.publish("text", |s| {
                    let current = this.text_issued.is_current(issued);
                    if current {
                        s.text = text;
                    }
                    current
                });
            }
        });
    }

    fn refresh_open_flag(&self) {
        let issued = self.open_issued.issue();
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.reader.read_is_open().await;
            record("is_open", &result);
            if let Ok(is_open) = result {
                this.publish("is_open", |s| {
                    let current = this.open_issued.is_current(issued);
                    if current {
                        s.is_open = is_open;
                    }
                    current
                });
            }
        });
    }

    /// Reads both fields now. Supersedes every read already in flight.
    async fn read_now(&self) -> Result<PuzzleState, RemoteReadError> {
        let text_read = self.text_issued.issue();
        let open_read = self.open_issued.issue();
        let fresh = self.reader.read_state().await?;

        self.publish("state", |s| {
            let mut changed = false;
            if self.text_issued.is_current(text_read) {
                s.text.clone_from(&fresh.text);
                changed = true;
            }
            if self.open_issued.is_current(open_read) {
                s.is_open = fresh.is_open;
                changed = true;
            }
            changed
        });
        Ok(fresh)
    }

    fn publish(&self, field: &'static str, modify: impl FnOnce(&mut PuzzleState) -> bool) {
        if !self.state.send_if_modified(modify) {
            debug!(field, "Discarding superseded refresh");
        }
    }
}

fn record<T>(field: &'static str, result: &Result<T, RemoteReadError>) {
    match result {
        Ok(_) => {
            STATE_REFRESHES.with_label_values(&[field, "ok"]).inc();
        }
        Err(e) => {
            STATE_REFRESHES.with_label_values(&[field, "error"]).inc();
            warn!(field, error = %e, "State refresh failed");
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Turns stream items into feed entries and refreshes. Never awaits.
struct Dispatcher {
    stream: LifecycleStream,
    schema: LogSchema,
    decoder: LogDecoder,
    viewer: Option<Identity>,
    feed: EventFeed,
    refresher: Refresher,
}

impl Dispatcher {
    fn on_log(&self, log: &RawLog) {
        let event = match self.decoder.decode(&self.schema, log) {
            Ok(event) => event,
            Err(e) => {
                debug!(stream = %self.stream, error = %e, "Dropping undecodable notification");
                return;
            }
        };

        NOTIFICATIONS
            .with_label_values(&[self.stream.event_name()])
            .inc();
        self.feed.push(FeedEntry::new(
            self.stream.feed_source(),
            event.summary(self.viewer.as_ref()),
        ));

        match event {
            DecodedEvent::RiddleSet { .. } => self.refresher.refresh_all(),
            DecodedEvent::AnswerAttempt { correct: true, .. } => {
                self.refresher.refresh_open_flag();
            }
            DecodedEvent::AnswerAttempt { .. } | DecodedEvent::Unrecognized { .. } => {}
        }
    }

    fn on_transport_error(&self, error: &SubscriptionTransportError) {
        TRANSPORT_ERRORS.inc();
        warn!(stream = %self.stream, error = %error, "Notification transport error");
        self.feed.push(diagnostic(self.stream, error));
    }

    fn on_stream_end(&self) {
        warn!(stream = %self.stream, "Notification stream ended");
        self.feed
            .push(diagnostic(self.stream, &"notification stream closed"));
    }
}

/// Handles one item under the gate. Returns `false` once the gate is closed.
fn deliver(gate: &Gate, dispatcher: &Dispatcher, event: TransportEvent) -> bool {
    gate.run(|| match event {
        Ok(log) => dispatcher.on_log(&log),
        Err(e) => dispatcher.on_transport_error(&e),
    })
}

async fn pump(mut events: mpsc::Receiver<TransportEvent>, gate: Gate, dispatcher: Dispatcher) {
    while let Some(event) = events.recv().await {
        if !deliver(&gate, &dispatcher, event) {
            return;
        }
    }
    gate.close_with(|| dispatcher.on_stream_end());
}

// =============================================================================
// HANDLE
// =============================================================================

/// One open notification stream. Released exactly once, by
/// [`unsubscribe`](Self::unsubscribe) or on drop.
pub struct SubscriptionHandle {
    stream: LifecycleStream,
    id: String,
    gate: Gate,
    pump: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl SubscriptionHandle {
    pub fn stream(&self) -> LifecycleStream {
        self.stream
    }

    /// Transport-assigned subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SubscriptionState {
        if self.gate.is_open() {
            SubscriptionState::Active
        } else {
            SubscriptionState::Unsubscribed
        }
    }

    /// Stops delivery and releases the transport stream. Idempotent.
    ///
    /// Blocks until a notification being handled concurrently has finished;
    /// after return no further feed entries come from this subscription.
    pub fn unsubscribe(&mut self) {
        if self.gate.close_with(|| {}) {
            debug!(stream = %self.stream, id = %self.id, "Unsubscribed");
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.cancel.cancel();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("stream", &self.stream)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Owns both lifecycle subscriptions, the event feed and the puzzle state
/// channel for one session.
pub struct LifecycleSubscriptionManager {
    notifications: Arc<dyn NotificationSource>,
    refresher: Refresher,
    feed: EventFeed,
    identity: Option<Identity>,
    riddle_set: Option<SubscriptionHandle>,
    answer_attempt: Option<SubscriptionHandle>,
}

impl LifecycleSubscriptionManager {
    pub fn new(
        notifications: Arc<dyn NotificationSource>,
        reader: Arc<PuzzleReader>,
        feed: EventFeed,
    ) -> Self {
        Self {
            notifications,
            refresher: Refresher::new(reader),
            feed,
            identity: None,
            riddle_set: None,
            answer_attempt: None,
        }
    }

    /// The shared event feed.
    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    /// Receiver of every state update produced by refreshes.
    pub fn watch_state(&self) -> watch::Receiver<PuzzleState> {
        self.refresher.state.subscribe()
    }

    /// Latest known puzzle state.
    pub fn puzzle_state(&self) -> PuzzleState {
        self.refresher.state.borrow().clone()
    }

    /// Identity the open subscriptions were started with.
    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn state(&self, stream: LifecycleStream) -> SubscriptionState {
        self.handle(stream)
            .map_or(SubscriptionState::Unsubscribed, SubscriptionHandle::state)
    }

    /// Opens both subscriptions for `identity`, closing any open ones first.
    ///
    /// A stream that cannot be opened leaves a diagnostic in the feed and
    /// stays unsubscribed; the other stream is still opened. The first such
    /// failure is returned.
    pub async fn start(&mut self, identity: Option<Identity>) -> Result<(), LedgerError> {
        self.shutdown();
        self.identity = identity;

        let riddle_set = self.open(LifecycleStream::RiddleSet).await;
        let answer_attempt = self.open(LifecycleStream::AnswerAttempt).await;

        let mut first_error = None;
        for (stream, result) in [
            (LifecycleStream::RiddleSet, riddle_set),
            (LifecycleStream::AnswerAttempt, answer_attempt),
        ] {
            match result {
                Ok(handle) => *self.slot(stream) = Some(handle),
                Err(e) => {
                    warn!(%stream, error = %e, "Failed to subscribe");
                    self.feed.push(diagnostic(stream, &e));
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Identity changed: closes both subscriptions and reopens them.
    pub async fn rebind(&mut self, identity: Option<Identity>) -> Result<(), LedgerError> {
        debug!(?identity, "Rebinding lifecycle subscriptions");
        self.start(identity).await
    }

    /// Closes both subscriptions. Idempotent.
    pub fn shutdown(&mut self) {
        self.unsubscribe(LifecycleStream::RiddleSet);
        self.unsubscribe(LifecycleStream::AnswerAttempt);
    }

    /// Reads both state fields now and publishes them, unless a newer
    /// refresh of a field was issued while this one was in flight.
    pub async fn refresh_now(&self) -> Result<PuzzleState, RemoteReadError> {
        self.refresher.read_now().await
    }

    async fn open(&self, stream: LifecycleStream) -> Result<SubscriptionHandle, LedgerError> {
        let contract = self.refresher.reader.contract();
        let schema = match stream {
            LifecycleStream::RiddleSet => contract.riddle_set(),
            LifecycleStream::AnswerAttempt => contract.answer_attempt(),
        }
        .clone();

        let filter = LogFilter::event(contract.address(), schema.topic0());
        let subscription = self.notifications.subscribe(filter).await?;
        debug!(%stream, id = %subscription.id, "Subscribed");

        let gate = Gate::open();
        let dispatcher = Dispatcher {
            stream,
            schema,
            decoder: LogDecoder::for_contract(contract.address()),
            viewer: self.identity,
            feed: self.feed.clone(),
            refresher: self.refresher.clone(),
        };
        let pump = tokio::spawn(pump(subscription.events, gate.clone(), dispatcher));

        Ok(SubscriptionHandle {
            stream,
            id: subscription.id,
            gate,
            pump: Some(pump),
            cancel: subscription.cancel,
        })
    }

    fn handle(&self, stream: LifecycleStream) -> Option<&SubscriptionHandle> {
        match stream {
            LifecycleStream::RiddleSet => self.riddle_set.as_ref(),
            LifecycleStream::AnswerAttempt => self.answer_attempt.as_ref(),
        }
    }

    fn slot(&mut self, stream: LifecycleStream) -> &mut Option<SubscriptionHandle> {
        match stream {
            LifecycleStream::RiddleSet => &mut self.riddle_set,
            LifecycleStream::AnswerAttempt => &mut self.answer_attempt,
        }
    }

    /// Unsubscribes one stream. Idempotent.
    pub fn unsubscribe(&mut self, stream: LifecycleStream) {
        if let Some(mut handle) = self.slot(stream).take() {
            handle.unsubscribe();
        }
    }
}

impl Drop for LifecycleSubscriptionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_runs_only_while_open() {
        let gate = Gate::open();
        let mut runs = 0;
        assert!(gate.run(|| runs += 1));
        assert!(gate.close_with(|| runs += 10));
        assert!(!gate.run(|| runs += 100));
        assert!(!gate.close_with(|| runs += 1000));
        assert_eq!(runs, 11);
    }

    #[test]
    fn test_diagnostic_text() {
        let entry = diagnostic(
            LifecycleStream::AnswerAttempt,
            &SubscriptionTransportError::Disconnected("reset by peer".into()),
        );
        assert_eq!(entry.source, FeedSource::Diagnostic);
        assert_eq!(
            entry.text,
            "Error watching AnswerAttempt event: connection lost: reset by peer"
        );
    }

    #[test]
    fn test_close_blocks_while_delivering() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let gate = Gate::open();
        let delivered = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let worker = {
            let gate = gate.clone();
            let delivered = delivered.clone();
            std::thread::spawn(move || {
                gate.run(|| {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    delivered.store(true, Ordering::SeqCst);
                });
            })
        };

        entered_rx.recv().unwrap();
        gate.close_with(|| {});
        // close returned only after the in-flight delivery finished
        assert!(delivered.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
