//! # WebSocket Subscription Tests
//!
//! Drives `WsNotificationSource` against a scripted node on localhost.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use riddle_core::domain::entities::LogFilter;
use riddle_core::domain::value_objects::{Address, Hash};
use riddle_core::errors::SubscriptionTransportError;
use riddle_core::ports::outbound::NotificationSource;
use riddle_rpc::{ReconnectPolicy, WsNotificationSource};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerStream = WebSocketStream<TcpStream>;

fn contract() -> Address {
    Address::from_low_u64_be(0xC0DE)
}

fn filter() -> LogFilter {
    LogFilter::event(contract(), Hash::from_low_u64_be(1))
}

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

async fn next_request(ws: &mut ServerStream) -> Option<Value> {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).ok();
        }
    }
    None
}

/// Accepts one connection and answers its `eth_subscribe` with `sub_id`.
async fn accept_subscription(listener: &TcpListener, sub_id: &str) -> ServerStream {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(tcp).await.unwrap();

    let request = next_request(&mut ws).await.unwrap();
    assert_eq!(request["method"], "eth_subscribe");
    assert_eq!(request["params"][0], "logs");
    let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": sub_id});
    ws.send(Message::Text(reply.to_string().into())).await.unwrap();
    ws
}

async fn notify(ws: &mut ServerStream, sub_id: &str, block: u64) {
    let notification = json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {
            "subscription": sub_id,
            "result": {
                "address": "0x000000000000000000000000000000000000c0de",
                "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
                "data": "0x",
                "blockNumber": format!("0x{block:x}"),
                "logIndex": "0x0",
                "removed": false
            }
        }
    });
    ws.send(Message::Text(notification.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_subscribe_deliver_and_unsubscribe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (seen_tx, mut seen_rx) = mpsc::channel::<Value>(4);

    let server = tokio::spawn(async move {
        let mut ws = accept_subscription(&listener, "0xfeed").await;
        notify(&mut ws, "0xfeed", 7).await;
        // a notification for some other subscription is ignored
        notify(&mut ws, "0xother", 8).await;
        if let Some(request) = next_request(&mut ws).await {
            let _ = seen_tx.send(request).await;
        }
    });

    let source = WsNotificationSource::new(url);
    let mut subscription = source.subscribe(filter()).await.unwrap();
    assert_eq!(subscription.id, "0xfeed");

    let log = timeout(Duration::from_secs(2), subscription.events.recv())
        .await
        .expect("Should receive within timeout")
        .expect("Stream should be open")
        .expect("Should be a log");
    assert_eq!(log.address, contract());
    assert_eq!(log.block_number, Some(7));

    subscription.cancel.cancel();
    let unsubscribe = timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .expect("Should unsubscribe within timeout")
        .expect("Server saw a request");
    assert_eq!(unsubscribe["method"], "eth_unsubscribe");
    assert_eq!(unsubscribe["params"][0], "0xfeed");

    server.await.unwrap();
}

#[tokio::test]
async fn test_rejected_subscribe_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let request = next_request(&mut ws).await.unwrap();
        let reply = json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32601, "message": "the method eth_subscribe does not exist"}
        });
        let _ = ws.send(Message::Text(reply.to_string().into())).await;
    });

    let err = WsNotificationSource::new(url)
        .subscribe(filter())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        riddle_core::errors::LedgerError::Rpc {
            code: -32601,
            message: "the method eth_subscribe does not exist".into()
        }
    );
}

/// A dropped connection is reported in-band and the adapter resubscribes.
#[tokio::test]
async fn test_reconnects_after_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let mut first = accept_subscription(&listener, "0x1").await;
        first.close(None).await.unwrap();
        drop(first);

        let mut second = accept_subscription(&listener, "0x2").await;
        notify(&mut second, "0x2", 9).await;
        // keep the connection open until the client goes away
        while next_request(&mut second).await.is_some() {}
    });

    let source = WsNotificationSource::with_options(url, Duration::from_secs(2), fast_policy(5));
    let mut subscription = source.subscribe(filter()).await.unwrap();

    let first = timeout(Duration::from_secs(2), subscription.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        first,
        Err(SubscriptionTransportError::Disconnected(_))
    ));

    let second = timeout(Duration::from_secs(2), subscription.events.recv())
        .await
        .unwrap()
        .unwrap()
        .expect("log after reconnect");
    assert_eq!(second.block_number, Some(9));
}

/// After the last failed reconnect the stream ends.
#[tokio::test]
async fn test_stream_ends_when_reconnect_gives_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut ws = accept_subscription(&listener, "0x1").await;
        ws.close(None).await.unwrap();
        // dropping the listener refuses further connections
    });

    let source = WsNotificationSource::with_options(url, Duration::from_secs(1), fast_policy(2));
    let mut subscription = source.subscribe(filter()).await.unwrap();
    server.await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = timeout(Duration::from_secs(5), subscription.events.recv())
        .await
        .expect("stream should end")
    {
        events.push(event);
    }

    assert!(matches!(
        events.first(),
        Some(Err(SubscriptionTransportError::Disconnected(_)))
    ));
    let connect_errors = events
        .iter()
        .filter(|e| matches!(e, Err(SubscriptionTransportError::Connect(_))))
        .count();
    assert_eq!(connect_errors, 2);
}

/// Cancelling releases the subscription even when the node has stopped
/// reading from the connection.
#[tokio::test]
async fn test_cancel_completes_when_node_stops_reading() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let ws = accept_subscription(&listener, "0xfeed").await;
        // hold the socket open without ever reading from it again
        let _ = release_rx.await;
        drop(ws);
    });

    let source =
        WsNotificationSource::with_options(url, Duration::from_millis(200), fast_policy(1));
    let mut subscription = source.subscribe(filter()).await.unwrap();
    subscription.cancel.cancel();

    let end = timeout(Duration::from_secs(2), subscription.events.recv())
        .await
        .expect("stream should end after cancel");
    assert!(end.is_none());

    let _ = release_tx.send(());
    server.await.unwrap();
}
