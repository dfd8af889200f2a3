//! WebSocket log subscriptions (`eth_subscribe("logs", ...)`) implementing
//! the notification port.
//!
//! Each subscription owns one connection. When the connection drops the
//! consumer receives a `Disconnected` error in-band and the adapter
//! reconnects with exponential backoff, re-issuing `eth_subscribe`. After
//! the last failed attempt the stream ends.

use crate::client::JsonRpcRequest;
use crate::error::{JsonRpcError, RpcError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use riddle_core::config::ClientConfig;
use riddle_core::domain::entities::{LogFilter, RawLog};
use riddle_core::errors::{LedgerError, SubscriptionTransportError};
use riddle_core::ports::outbound::{NotificationSource, TransportEvent, TransportSubscription};
use riddle_telemetry::RECONNECTS;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffered notifications per subscription.
const EVENT_BUFFER: usize = 256;

/// Default bound on connecting and subscribing.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum WebSocket reconnection attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Base delay between reconnection attempts (exponential backoff).
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Reconnection schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(6);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// =============================================================================
// FRAMES
// =============================================================================

/// Any frame the node sends on a subscription connection.
#[derive(Debug, Deserialize)]
struct RawFrame {
    id: Option<u64>,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
    method: Option<String>,
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: String,
    result: serde_json::Value,
}

/// A parsed frame.
#[derive(Debug)]
enum Frame {
    /// Response to a request we sent.
    Reply {
        id: u64,
        result: Result<serde_json::Value, JsonRpcError>,
    },
    /// `eth_subscription` push.
    Notification {
        subscription: String,
        result: serde_json::Value,
    },
    /// Error without a request id.
    Error(JsonRpcError),
    Other,
}

fn parse_frame(text: &str) -> Result<Frame, RpcError> {
    let raw: RawFrame = serde_json::from_str(text)?;

    if raw.method.as_deref() == Some("eth_subscription") {
        if let Some(params) = raw.params {
            return Ok(Frame::Notification {
                subscription: params.subscription,
                result: params.result,
            });
        }
    }

    Ok(match (raw.id, raw.error, raw.result) {
        (Some(id), Some(error), _) => Frame::Reply {
            id,
            result: Err(error),
        },
        (Some(id), None, result) => Frame::Reply {
            id,
            result: Ok(result.unwrap_or(serde_json::Value::Null)),
        },
        (None, Some(error), _) => Frame::Error(error),
        (None, None, _) => Frame::Other,
    })
}

// =============================================================================
// SOURCE
// =============================================================================

struct Inner {
    ws_url: String,
    request_id: AtomicU64,
    timeout: Duration,
    policy: ReconnectPolicy,
}

/// `NotificationSource` over a node's WebSocket endpoint.
#[derive(Clone)]
pub struct WsNotificationSource {
    inner: Arc<Inner>,
}

impl WsNotificationSource {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self::with_options(ws_url, DEFAULT_TIMEOUT, ReconnectPolicy::default())
    }

    /// `timeout` bounds connecting, each `eth_subscribe` round trip, and
    /// every write made while closing a subscription.
    pub fn with_options(ws_url: impl Into<String>, timeout: Duration, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                ws_url: ws_url.into(),
                request_id: AtomicU64::new(1),
                timeout,
                policy,
            }),
        }
    }

    /// Source for the configured (or derived) WebSocket endpoint.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_options(
            config.ws_endpoint(),
            config.request_timeout,
            ReconnectPolicy::default(),
        )
    }

    pub fn ws_url(&self) -> &str {
        &self.inner.ws_url
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Connects and issues `eth_subscribe`. Returns the stream and the
    /// node's subscription id.
    async fn open(&self, filter: &LogFilter) -> Result<(WsStream, String), RpcError> {
        let (mut ws, _) = tokio::time::timeout(self.timeout, connect_async(self.ws_url.as_str()))
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))??;

        let id = self.next_id();
        let request = JsonRpcRequest::new(id, "eth_subscribe", ("logs", filter));
        ws.send(Message::Text(serde_json::to_string(&request)?.into()))
            .await?;

        let subscription = tokio::time::timeout(self.timeout, await_reply(&mut ws, id))
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))??;
        let subscription = subscription
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                RpcError::Decode(format!("subscription id is not a string: {subscription}"))
            })?;

        Ok((ws, subscription))
    }

    /// Reconnects with backoff. `None` when every attempt failed or the
    /// consumer went away.
    async fn reconnect(
        &self,
        filter: &LogFilter,
        events: &mpsc::Sender<TransportEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Option<(WsStream, String)> {
        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay(attempt);
            debug!(attempt, ?delay, "Reconnecting");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = &mut *cancel => return None,
            }

            match self.open(filter).await {
                Ok(opened) => {
                    RECONNECTS.with_label_values(&["ok"]).inc();
                    info!(attempt, subscription = %opened.1, "Resubscribed");
                    return Some(opened);
                }
                Err(e) => {
                    RECONNECTS.with_label_values(&["error"]).inc();
                    warn!(attempt, error = %e, "Reconnect failed");
                    if events.send(Err(e.into())).await.is_err() {
                        return None;
                    }
                }
            }
        }

        warn!(
            attempts = self.policy.max_attempts,
            "WebSocket reconnection failed, ending stream"
        );
        None
    }
}

/// Reads frames until the reply to request `id`.
async fn await_reply(ws: &mut WsStream, id: u64) -> Result<serde_json::Value, RpcError> {
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                if let Frame::Reply { id: reply, result } = parse_frame(&text)? {
                    if reply == id {
                        return result.map_err(RpcError::from);
                    }
                }
            }
            Message::Ping(data) => ws.send(Message::Pong(data)).await?,
            Message::Close(frame) => return Err(RpcError::Closed(close_reason(frame))),
            _ => {}
        }
    }
    Err(RpcError::Closed("connection ended".into()))
}

fn close_reason(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(frame) if !frame.reason.is_empty() => frame.reason.as_str().to_string(),
        _ => "closed by server".to_string(),
    }
}

// =============================================================================
// PUMP
// =============================================================================

enum Step {
    Cancelled,
    Message(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

/// Outcome of handling one frame.
enum Flow {
    Continue,
    Disconnected(String),
    ConsumerGone,
}

async fn pump(
    inner: Arc<Inner>,
    filter: LogFilter,
    mut ws: WsStream,
    mut subscription: String,
    events: mpsc::Sender<TransportEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        let step = tokio::select! {
            _ = &mut cancel => Step::Cancelled,
            () = events.closed() => Step::Cancelled,
            message = ws.next() => Step::Message(message),
        };

        let flow = match step {
            Step::Cancelled => {
                unsubscribe(&inner, &mut ws, &subscription).await;
                return;
            }
            Step::Message(Some(Ok(message))) => {
                handle_message(&mut ws, inner.timeout, &subscription, &events, message).await
            }
            Step::Message(Some(Err(e))) => Flow::Disconnected(e.to_string()),
            Step::Message(None) => Flow::Disconnected("connection ended".into()),
        };

        match flow {
            Flow::Continue => {}
            Flow::ConsumerGone => {
                unsubscribe(&inner, &mut ws, &subscription).await;
                return;
            }
            Flow::Disconnected(reason) => {
                warn!(subscription = %subscription, %reason, "Subscription connection lost");
                let lost = SubscriptionTransportError::Disconnected(reason);
                if events.send(Err(lost)).await.is_err() {
                    return;
                }
                match inner.reconnect(&filter, &events, &mut cancel).await {
                    Some((reopened, id)) => {
                        ws = reopened;
                        subscription = id;
                    }
                    // dropping `events` ends the stream
                    None => return,
                }
            }
        }
    }
}

async fn handle_message(
    ws: &mut WsStream,
    timeout: Duration,
    subscription: &str,
    events: &mpsc::Sender<TransportEvent>,
    message: Message,
) -> Flow {
    let event = match message {
        Message::Text(text) => match parse_frame(&text) {
            Ok(Frame::Notification {
                subscription: id,
                result,
            }) if id == subscription => {
                Some(serde_json::from_value::<RawLog>(result).map_err(|e| {
                    SubscriptionTransportError::Protocol(format!("invalid log: {e}"))
                }))
            }
            Ok(Frame::Error(error)) => Some(Err(SubscriptionTransportError::Rejected {
                code: error.code,
                message: error.message,
            })),
            Ok(_) => None,
            Err(e) => Some(Err(SubscriptionTransportError::Protocol(e.to_string()))),
        },
        Message::Ping(data) => {
            match tokio::time::timeout(timeout, ws.send(Message::Pong(data))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Flow::Disconnected(e.to_string()),
                Err(_) => return Flow::Disconnected("pong timed out".into()),
            }
            None
        }
        Message::Close(frame) => return Flow::Disconnected(close_reason(frame)),
        _ => None,
    };

    if let Some(event) = event {
        if events.send(event).await.is_err() {
            return Flow::ConsumerGone;
        }
    }
    Flow::Continue
}

/// Best-effort `eth_unsubscribe` and close, each bounded by the request
/// timeout so a stalled peer cannot keep the task alive.
async fn unsubscribe(inner: &Inner, ws: &mut WsStream, subscription: &str) {
    let request = JsonRpcRequest::new(inner.next_id(), "eth_unsubscribe", [subscription]);
    if let Ok(text) = serde_json::to_string(&request) {
        match tokio::time::timeout(inner.timeout, ws.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(subscription, error = %e, "eth_unsubscribe not sent"),
            Err(_) => {
                warn!(subscription, timeout = ?inner.timeout, "eth_unsubscribe timed out");
                return;
            }
        }
    }
    if tokio::time::timeout(inner.timeout, ws.close(None)).await.is_err() {
        warn!(subscription, timeout = ?inner.timeout, "Close handshake timed out");
        return;
    }
    debug!(subscription, "Subscription closed");
}

#[async_trait]
impl NotificationSource for WsNotificationSource {
    async fn subscribe(&self, filter: LogFilter) -> Result<TransportSubscription, LedgerError> {
        let (ws, subscription) = self.inner.open(&filter).await?;
        debug!(subscription = %subscription, url = %self.inner.ws_url, "eth_subscribe accepted");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(pump(
            self.inner.clone(),
            filter,
            ws,
            subscription.clone(),
            events_tx,
            cancel_rx,
        ));

        Ok(TransportSubscription::new(subscription, events_rx, cancel_tx))
    }
}
