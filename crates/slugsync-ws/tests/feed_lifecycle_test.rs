//! Feed connection lifecycle tests against a local mock server.
//!
//! - Subscription frames while connected
//! - Full replay after a server-side disconnect
//! - Commands issued during an outage
//! - Inbound decoding, ordering, and protocol-error teardown
//! - Shutdown and reconnect budget

mod common;
use common::{slugs, wait_until, MockFeedServer};

use slugsync_ws::{
    ConnectionConfig, ConnectionState, FeedConnection, FeedHandle, FeedMessage, Operation,
    SubscriptionRequest, WsError, WsResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(5);

fn test_config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        url,
        reconnect_base_delay_ms: 20,
        reconnect_max_delay_ms: 200,
        reconnect_jitter_ms: 10,
        connect_timeout_ms: 2000,
        heartbeat_interval_ms: 60_000,
        heartbeat_timeout_ms: 10_000,
        ..Default::default()
    }
}

struct Harness {
    conn: Arc<FeedConnection>,
    handle: FeedHandle,
    messages: mpsc::Receiver<FeedMessage>,
    task: JoinHandle<WsResult<()>>,
    token: CancellationToken,
}

fn start(config: ConnectionConfig) -> Harness {
    let (message_tx, messages) = mpsc::channel(100);
    let token = CancellationToken::new();
    let conn = Arc::new(FeedConnection::new(config, message_tx, &token));
    let handle = conn.handle();
    let runner = conn.clone();
    let task = tokio::spawn(async move { runner.run().await });
    Harness {
        conn,
        handle,
        messages,
        task,
        token,
    }
}

async fn wait_connected(handle: &FeedHandle) {
    let mut state = handle.state_watch();
    timeout(LIMIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("connect within timeout")
        .expect("state channel open");
}

#[tokio::test]
async fn test_commands_queued_before_connect_are_delivered() {
    let server = MockFeedServer::start().await;
    let (message_tx, _messages) = mpsc::channel(100);
    let token = CancellationToken::new();
    let conn = Arc::new(FeedConnection::new(test_config(server.url()), message_tx, &token));

    let handle = conn.handle();
    handle.subscribe(slugs(&["a", "b"])).await.unwrap();

    let runner = conn.clone();
    let task = tokio::spawn(async move { runner.run().await });

    let srv = &server;
    assert!(
        wait_until(LIMIT, move || async move { srv.subscribed(0).await == slugs(&["a", "b"]) }).await,
        "queued subscribe should reach the server"
    );

    token.cancel();
    timeout(LIMIT, task).await.unwrap().unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_incremental_frames_unsubscribe_first() {
    let server = MockFeedServer::start().await;
    let h = start(test_config(server.url()));
    wait_connected(&h.handle).await;

    h.handle.subscribe(slugs(&["a", "b"])).await.unwrap();
    h.handle.sync(slugs(&["b", "c"])).await.unwrap();
    // Redundant: already tracked, so no frame
    h.handle.subscribe(slugs(&["c"])).await.unwrap();

    let srv = &server;
    assert!(wait_until(LIMIT, move || async move { srv.requests(0).await.len() >= 3 }).await);
    // Give a redundant frame the chance to show up before asserting
    tokio::time::sleep(Duration::from_millis(50)).await;

    let requests = server.requests(0).await;
    assert_eq!(
        requests,
        vec![
            SubscriptionRequest::new(Operation::Subscribe, slugs(&["a", "b"])),
            SubscriptionRequest::new(Operation::Unsubscribe, slugs(&["a"])),
            SubscriptionRequest::new(Operation::Subscribe, slugs(&["c"])),
        ]
    );
    assert_eq!(h.conn.active_subscriptions(), slugs(&["b", "c"]));

    h.token.cancel();
    timeout(LIMIT, h.task).await.unwrap().unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_replays_full_set() {
    let server = MockFeedServer::start().await;
    let h = start(test_config(server.url()));
    wait_connected(&h.handle).await;

    h.handle.subscribe(slugs(&["a", "b", "c"])).await.unwrap();
    h.handle.unsubscribe(slugs(&["b"])).await.unwrap();

    let srv = &server;
    assert!(wait_until(LIMIT, move || async move { srv.subscribed(0).await == slugs(&["a", "c"]) }).await);

    server.kick_all();

    assert!(
        wait_until(LIMIT, move || async move { !srv.requests(1).await.is_empty() }).await,
        "client should reconnect and replay"
    );

    let replay = server.requests(1).await;
    assert_eq!(
        replay[0],
        SubscriptionRequest::new(Operation::Subscribe, slugs(&["a", "c"]))
    );
    assert_eq!(replay.len(), 1);

    wait_connected(&h.handle).await;
    assert_eq!(h.conn.reconnect_count(), 0);

    h.token.cancel();
    timeout(LIMIT, h.task).await.unwrap().unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_changes_during_outage_are_replayed() {
    let server = MockFeedServer::start().await;
    let h = start(test_config(server.url()));
    wait_connected(&h.handle).await;

    h.handle.subscribe(slugs(&["old"])).await.unwrap();
    let srv = &server;
    assert!(wait_until(LIMIT, move || async move { srv.subscribed(0).await == slugs(&["old"]) }).await);

    server.kick_all();
    h.handle.unsubscribe(slugs(&["old"])).await.unwrap();
    h.handle.subscribe(slugs(&["new"])).await.unwrap();

    // Whether the changes land before or after the reconnect, the latest
    // connection must end up with exactly the new set.
    assert!(
        wait_until(LIMIT, move || async move {
            let count = srv.connection_count().await;
            count >= 2 && srv.subscribed(count - 1).await == slugs(&["new"])
        })
        .await
    );

    h.token.cancel();
    timeout(LIMIT, h.task).await.unwrap().unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_inbound_messages_forwarded_in_order() {
    let server = MockFeedServer::start().await;
    let mut h = start(test_config(server.url()));
    wait_connected(&h.handle).await;

    server.send(
        r#"[{"event_type":"book","slug":"btc-up"},{"event_type":"price_change","slug":"btc-up"}]"#,
    );
    server.send("PONG");
    server.send("not json");
    server.send(r#"{"event_type":"last_trade_price","market_slug":"eth-up"}"#);

    let mut received = Vec::new();
    for _ in 0..3 {
        let msg = timeout(LIMIT, h.messages.recv())
            .await
            .expect("message within timeout")
            .expect("channel open");
        received.push(msg);
    }

    let types: Vec<&str> = received.iter().map(|m| m.event_type.as_str()).collect();
    assert_eq!(types, vec!["book", "price_change", "last_trade_price"]);
    assert_eq!(received[2].slug.as_ref().map(|s| s.as_str()), Some("eth-up"));

    // One bad frame is below the threshold
    assert_eq!(h.handle.state(), ConnectionState::Connected);
    assert_eq!(server.connection_count().await, 1);

    h.token.cancel();
    timeout(LIMIT, h.task).await.unwrap().unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_protocol_errors_force_reconnect() {
    let server = MockFeedServer::start().await;
    let config = ConnectionConfig {
        max_consecutive_protocol_errors: 3,
        ..test_config(server.url())
    };
    let h = start(config);
    wait_connected(&h.handle).await;

    for _ in 0..3 {
        server.send("garbage");
    }

    let srv = &server;
    assert!(
        wait_until(LIMIT, move || async move { srv.connection_count().await >= 2 }).await,
        "connection should be recycled after repeated protocol errors"
    );

    h.token.cancel();
    timeout(LIMIT, h.task).await.unwrap().unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_clean() {
    let server = MockFeedServer::start().await;
    let h = start(test_config(server.url()));
    wait_connected(&h.handle).await;

    h.conn.shutdown();
    let result = timeout(LIMIT, h.task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(h.conn.state(), ConnectionState::Disconnected);

    // The parent token is untouched by a local shutdown
    assert!(!h.token.is_cancelled());
    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_budget_exhausted() {
    // Bind and release a port so nothing is listening on it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ConnectionConfig {
        max_reconnect_attempts: 2,
        reconnect_base_delay_ms: 1,
        reconnect_jitter_ms: 0,
        ..test_config(format!("ws://{}", addr))
    };
    let h = start(config);

    let result = timeout(LIMIT, h.task).await.unwrap().unwrap();
    assert!(matches!(result, Err(WsError::MaxReconnectAttempts(2))));
    assert_eq!(h.conn.state(), ConnectionState::Disconnected);
}
