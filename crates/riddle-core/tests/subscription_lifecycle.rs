//! # Subscription Lifecycle Tests
//!
//! Feed mirroring, state refreshes, cancellation and transport failures of
//! the two lifecycle subscriptions.

use std::sync::Arc;
use std::time::Duration;

use riddle_core::prelude::*;
use tokio::time::timeout;

fn alice() -> Address {
    Address::from_low_u64_be(0xA11CE)
}

fn bob() -> Address {
    Address::from_low_u64_be(0xB0B)
}

fn ledger() -> Arc<InMemoryLedger> {
    Arc::new(
        InMemoryLedger::new(Address::from_low_u64_be(0xC0DE), Address::from_low_u64_be(0xB07))
            .expect("embedded ABI"),
    )
}

fn manager(ledger: &Arc<InMemoryLedger>) -> LifecycleSubscriptionManager {
    let contract = ContractHandle::onchain_riddle(ledger.contract()).expect("contract");
    RiddleClient::new(contract, LedgerPorts::from_ledger(ledger.clone()))
        .subscription_manager(EventFeed::new())
}

fn attempt(ledger: &InMemoryLedger, user: Address, correct: bool) -> RawLog {
    ledger
        .event_log(
            names::ANSWER_ATTEMPT,
            &[AbiValue::Address(user), AbiValue::Bool(correct)],
        )
        .expect("AnswerAttempt log")
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Gives spawned pumps and refreshes a chance to run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn texts(feed: &EventFeed) -> Vec<String> {
    feed.snapshot().into_iter().map(|entry| entry.text).collect()
}

#[tokio::test]
async fn test_start_opens_both_streams() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    assert_eq!(
        manager.state(LifecycleStream::RiddleSet),
        SubscriptionState::Unsubscribed
    );

    manager.start(Some(alice())).await.unwrap();

    assert_eq!(manager.state(LifecycleStream::RiddleSet), SubscriptionState::Active);
    assert_eq!(
        manager.state(LifecycleStream::AnswerAttempt),
        SubscriptionState::Active
    );
    assert_eq!(manager.identity(), Some(alice()));
    assert_eq!(ledger.active_subscriptions(), 2);
}

/// A RiddleSet notification appends one entry and re-reads both fields once.
#[tokio::test]
async fn test_riddle_set_refreshes_text_and_flag() {
    // Arrange
    let ledger = ledger();
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();
    let state = manager.watch_state();

    // Act
    ledger.publish_riddle("What has keys?", "piano").unwrap();

    // Assert
    wait_for("state refresh", || {
        let current = state.borrow();
        current.text == "What has keys?" && current.is_open
    })
    .await;
    settle().await;

    assert_eq!(
        texts(manager.feed()),
        vec![r#"RiddleSet: {"riddle":"What has keys?"}"#]
    );
    assert_eq!(ledger.call_count("riddle"), 1);
    assert_eq!(ledger.call_count("isActive"), 1);
    assert_eq!(manager.puzzle_state().text, "What has keys?");
}

/// Back-to-back attempts land in order; only the correct one refreshes.
#[tokio::test]
async fn test_answer_attempts_in_order_with_one_refresh() {
    let ledger = ledger();
    ledger.publish_riddle("q", "a").unwrap();
    let mut manager = manager(&ledger);
    manager.start(Some(alice())).await.unwrap();

    ledger.emit(attempt(&ledger, bob(), false));
    ledger.emit(attempt(&ledger, alice(), true));

    wait_for("two feed entries", || manager.feed().len() == 2).await;
    wait_for("isActive refresh", || ledger.call_count("isActive") == 1).await;
    settle().await;

    let feed = manager.feed().snapshot();
    assert_eq!(feed[0].source, FeedSource::AnswerAttempt);
    assert!(feed[0].text.contains(r#""correct":false"#));
    assert!(!feed[0].text.ends_with("(you)"));
    assert!(feed[1].text.contains(r#""correct":true"#));
    assert!(feed[1].text.ends_with("(you)"));

    assert_eq!(ledger.call_count("isActive"), 1);
    assert_eq!(ledger.call_count("riddle"), 0);
}

#[tokio::test]
async fn test_undecodable_notification_is_dropped() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();

    let mut corrupt = attempt(&ledger, bob(), true);
    corrupt.data = Bytes(vec![0x02; 32]);
    ledger.emit(corrupt);
    ledger.emit(attempt(&ledger, bob(), false));

    wait_for("valid entry", || manager.feed().len() == 1).await;
    settle().await;
    assert_eq!(manager.feed().len(), 1);
    assert_eq!(ledger.call_count("isActive"), 0);
}

/// Once unsubscribe returns, a transport still delivering cannot reach the
/// feed.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_feed_mutation_after_unsubscribe() {
    let ledger = ledger();
    ledger.deliver_after_cancel(true);
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();

    let flood = {
        let ledger = ledger.clone();
        std::thread::spawn(move || {
            for _ in 0..2_000 {
                ledger.emit(attempt(&ledger, bob(), false));
            }
        })
    };

    wait_for("first deliveries", || !manager.feed().is_empty()).await;
    manager.unsubscribe(LifecycleStream::AnswerAttempt);
    let frozen = manager.feed().len();

    flood.join().unwrap();
    settle().await;

    assert_eq!(manager.feed().len(), frozen);
    assert_eq!(
        manager.state(LifecycleStream::AnswerAttempt),
        SubscriptionState::Unsubscribed
    );
    assert_eq!(manager.state(LifecycleStream::RiddleSet), SubscriptionState::Active);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();

    manager.unsubscribe(LifecycleStream::RiddleSet);
    manager.unsubscribe(LifecycleStream::RiddleSet);
    manager.shutdown();
    manager.shutdown();

    assert_eq!(ledger.active_subscriptions(), 0);
    ledger.publish_riddle("q", "a").unwrap();
    ledger.emit(attempt(&ledger, bob(), true));
    settle().await;
    assert!(manager.feed().is_empty());
}

#[tokio::test]
async fn test_drop_releases_transport_streams() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();
    assert_eq!(ledger.active_subscriptions(), 2);

    drop(manager);

    assert_eq!(ledger.active_subscriptions(), 0);
}

/// Changing identity reopens both streams; `(you)` follows the new identity.
#[tokio::test]
async fn test_rebind_follows_new_identity() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    manager.start(Some(alice())).await.unwrap();

    ledger.emit(attempt(&ledger, bob(), false));
    wait_for("first entry", || manager.feed().len() == 1).await;

    manager.rebind(Some(bob())).await.unwrap();
    assert_eq!(ledger.active_subscriptions(), 2);
    assert_eq!(manager.identity(), Some(bob()));

    ledger.emit(attempt(&ledger, bob(), false));
    wait_for("second entry", || manager.feed().len() == 2).await;

    let feed = texts(manager.feed());
    assert!(!feed[0].ends_with("(you)"));
    assert!(feed[1].ends_with("(you)"));
}

/// Transport errors become diagnostics and do not end the subscription.
#[tokio::test]
async fn test_transport_error_keeps_subscription_active() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();

    ledger.inject_transport_error(SubscriptionTransportError::Disconnected(
        "reset by peer".into(),
    ));
    wait_for("diagnostics", || manager.feed().len() == 2).await;

    let feed = manager.feed().snapshot();
    assert!(feed.iter().all(|e| e.source == FeedSource::Diagnostic));
    let feed_texts = texts(manager.feed());
    assert!(feed_texts
        .contains(&"Error watching RiddleSet event: connection lost: reset by peer".to_string()));
    assert!(feed_texts.contains(
        &"Error watching AnswerAttempt event: connection lost: reset by peer".to_string()
    ));

    assert_eq!(manager.state(LifecycleStream::RiddleSet), SubscriptionState::Active);
    ledger.emit(attempt(&ledger, bob(), false));
    wait_for("delivery after error", || manager.feed().len() == 3).await;
}

/// A stream the transport gives up on ends with a diagnostic and is not
/// reopened automatically.
#[tokio::test]
async fn test_stream_end_unsubscribes() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();

    ledger.end_streams();

    wait_for("both streams closed", || {
        manager.state(LifecycleStream::RiddleSet) == SubscriptionState::Unsubscribed
            && manager.state(LifecycleStream::AnswerAttempt) == SubscriptionState::Unsubscribed
    })
    .await;
    let feed_texts = texts(manager.feed());
    assert_eq!(feed_texts.len(), 2);
    assert!(feed_texts
        .iter()
        .all(|text| text.ends_with("event: notification stream closed")));
    assert_eq!(ledger.active_subscriptions(), 0);

    // an explicit start reopens them
    manager.start(None).await.unwrap();
    assert_eq!(ledger.active_subscriptions(), 2);
}

#[tokio::test]
async fn test_subscribe_failure_is_reported() {
    let ledger = ledger();
    let mut manager = manager(&ledger);
    ledger.fail_next_subscribe(LedgerError::Transport("connection refused".into()));

    let err = manager.start(None).await.unwrap_err();

    assert_eq!(err, LedgerError::Transport("connection refused".into()));
    assert_eq!(
        manager.state(LifecycleStream::RiddleSet),
        SubscriptionState::Unsubscribed
    );
    assert_eq!(
        manager.state(LifecycleStream::AnswerAttempt),
        SubscriptionState::Active
    );
    assert_eq!(
        texts(manager.feed()),
        vec!["Error watching RiddleSet event: transport error: connection refused"]
    );
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_state() {
    let ledger = ledger();
    ledger.publish_riddle("q", "a").unwrap();
    let mut manager = manager(&ledger);
    manager.start(None).await.unwrap();
    manager.refresh_now().await.unwrap();

    ledger.fail_next_call(LedgerError::Transport("flaky".into()));
    ledger.emit(attempt(&ledger, bob(), true));
    wait_for("attempted refresh", || ledger.call_count("isActive") == 2).await;
    settle().await;

    // the ledger was not changed by the emitted log, and the failed read
    // left the last known state in place
    assert!(manager.puzzle_state().is_open);
    assert_eq!(manager.feed().len(), 1);
}

/// A slow read issued before a newer one must not overwrite the newer
/// result when it finally completes.
#[tokio::test]
async fn test_slow_stale_refresh_does_not_overwrite_newer_state() {
    // Arrange
    let ledger = ledger();
    let contract = ContractHandle::onchain_riddle(ledger.contract()).expect("contract");
    let client = RiddleClient::new(contract, LedgerPorts::from_ledger(ledger.clone()));
    let mut manager = client.subscription_manager(EventFeed::new());
    manager.start(Some(alice())).await.unwrap();
    ledger.set_call_latency(Duration::from_millis(300));

    // Act: the RiddleSet refresh snapshots `isActive = true`, then stalls
    ledger.publish_riddle("first", "paris").unwrap();
    wait_for("slow refresh issued", || ledger.call_count("isActive") == 1).await;
    ledger.set_call_latency(Duration::ZERO);

    let solved = client
        .submit_answer(&SubmissionRequest::new("paris", alice()))
        .await
        .unwrap();
    assert!(solved);
    wait_for("fast refresh", || ledger.call_count("isActive") == 2).await;

    // Assert: still closed after the stale read has completed
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(!ledger.puzzle_state().is_open);
    assert_eq!(manager.puzzle_state(), ledger.puzzle_state());
    assert_eq!(manager.puzzle_state().text, "first");
}

/// An explicit refresh supersedes notification reads still in flight.
#[tokio::test]
async fn test_refresh_now_supersedes_reads_in_flight() {
    let ledger = ledger();
    let contract = ContractHandle::onchain_riddle(ledger.contract()).expect("contract");
    let client = RiddleClient::new(contract, LedgerPorts::from_ledger(ledger.clone()));
    let mut manager = client.subscription_manager(EventFeed::new());
    manager.start(None).await.unwrap();
    ledger.set_call_latency(Duration::from_millis(300));

    ledger.publish_riddle("old", "a").unwrap();
    wait_for("slow refresh issued", || ledger.call_count("isActive") == 1).await;
    ledger.set_call_latency(Duration::ZERO);

    // solve it without a notification reaching the manager
    manager.unsubscribe(LifecycleStream::AnswerAttempt);
    assert!(client
        .submit_answer(&SubmissionRequest::new("a", bob()))
        .await
        .unwrap());

    let fresh = manager.refresh_now().await.unwrap();
    assert!(!fresh.is_open);

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(manager.puzzle_state(), fresh);
}
