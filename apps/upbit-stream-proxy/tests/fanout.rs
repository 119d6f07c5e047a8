//! Fan-Out Integration Tests
//!
//! Exercises the reference-counted broadcast source against a real local
//! WebSocket server: shared-stream reuse, grace-period teardown, and the
//! opt-in synthetic fallback.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{MockExchange, ServerBehavior, quiet_heartbeat, trade_json, wait_for_status};
use upbit_stream_proxy::{
    BackoffConfig, BroadcastSource, BroadcastSourceConfig, ConnectionStatus, FeedClient,
    FeedClientConfig, SourceMode, TradeCodec,
};

fn test_source(server: &MockExchange, grace: Duration) -> BroadcastSource<TradeCodec> {
    let client = FeedClient::new(
        FeedClientConfig {
            url: server.url.clone(),
            heartbeat: quiet_heartbeat(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(40),
                jitter_factor: 0.0,
                ..BackoffConfig::default()
            },
            max_retries: 20,
            min_send_interval: Duration::from_millis(10),
            ..FeedClientConfig::default()
        },
        TradeCodec::new(),
    );
    BroadcastSource::new(
        client,
        BroadcastSourceConfig {
            grace_period: grace,
            ..BroadcastSourceConfig::default()
        },
    )
}

async fn wait_for_attempts(server: &MockExchange, at_least: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.accepted() < at_least {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {at_least} connections, saw {}",
            server.accepted()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn set_equal_watches_share_one_upstream_connection() {
    let payloads = vec![trade_json("KRW-BTC", 1, "81500000.0")];
    let server = common::spawn(ServerBehavior::ServeTrades(payloads)).await;
    let source = test_source(&server, Duration::from_millis(100));

    let mut first = source.watch(["KRW-BTC", "KRW-ETH"]).unwrap();
    let trade = tokio::time::timeout(Duration::from_secs(5), first.recv())
        .await
        .expect("trade should arrive")
        .unwrap();
    assert_eq!(trade.sequence_id, 1);

    // Same set, different order: attaches to the live stream.
    let _second = source.watch(["KRW-ETH", "KRW-BTC"]).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(source.subscribers(), 2);
    assert_eq!(server.accepted(), 1);
    assert_eq!(source.client().connection_attempts(), 1);

    source.dispose();
}

#[tokio::test]
async fn a_different_symbol_set_resubscribes_upstream() {
    let server = common::spawn(ServerBehavior::Silent).await;
    let source = test_source(&server, Duration::from_millis(100));

    let mut first = source.watch(["KRW-BTC"]).unwrap();
    wait_for_attempts(&server, 1).await;

    let _second = source.watch(["KRW-ETH"]).unwrap();
    wait_for_attempts(&server, 2).await;

    // The previous shared stream was torn down.
    let closed = tokio::time::timeout(Duration::from_secs(5), first.recv())
        .await
        .expect("old stream should close");
    assert!(matches!(
        closed,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let frames = server.subscribe_frames();
    let last: serde_json::Value = serde_json::from_str(frames.last().unwrap()).unwrap();
    assert_eq!(last[1]["codes"], serde_json::json!(["KRW-ETH"]));

    source.dispose();
}

#[tokio::test]
async fn resubscribe_within_the_grace_period_reuses_the_upstream() {
    let server = common::spawn(ServerBehavior::Silent).await;
    let source = test_source(&server, Duration::from_millis(300));

    let handle = source.watch(["KRW-BTC"]).unwrap();
    wait_for_attempts(&server, 1).await;
    drop(handle);

    // Come back inside the window: no new connection.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _again = source.watch(["KRW-BTC"]).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(source.client().is_active());
    assert_eq!(server.accepted(), 1);

    source.dispose();
}

#[tokio::test]
async fn the_upstream_closes_exactly_once_after_the_grace_period() {
    let server = common::spawn(ServerBehavior::Silent).await;
    let source = test_source(&server, Duration::from_millis(50));

    let handle = source.watch(["KRW-BTC"]).unwrap();
    wait_for_attempts(&server, 1).await;
    drop(handle);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!source.client().is_active());
    assert_eq!(*source.mode().borrow(), SourceMode::Idle);
    assert_eq!(server.accepted(), 1);

    // Reconnect-after-teardown is a fresh upstream, not an error.
    let _revived = source.watch(["KRW-BTC"]).unwrap();
    wait_for_attempts(&server, 2).await;
    assert!(source.client().is_active());

    source.dispose();
}

#[tokio::test]
async fn synthetic_fallback_kicks_in_when_the_upstream_gives_up() {
    // Nothing listens here; the client exhausts its retries immediately.
    let client = FeedClient::new(
        FeedClientConfig {
            url: "ws://127.0.0.1:1".to_string(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                jitter_factor: 0.0,
                ..BackoffConfig::default()
            },
            max_retries: 0,
            ..FeedClientConfig::default()
        },
        TradeCodec::new(),
    );
    let source = BroadcastSource::new(
        client,
        BroadcastSourceConfig {
            synthetic_fallback: true,
            synthetic_interval: Duration::from_millis(20),
            ..BroadcastSourceConfig::default()
        },
    );

    let mut status = source.status();
    let mut handle = source.watch(["KRW-BTC"]).unwrap();
    wait_for_status(&mut status, ConnectionStatus::MaxRetryExceeded).await;

    // The stream keeps producing instead of going silent, and the degraded
    // mode is observable.
    let trade = tokio::time::timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("synthetic trade should arrive")
        .unwrap();
    assert_eq!(trade.market, upbit_stream_proxy::infrastructure::upbit::SYNTHETIC_MARKET);
    assert_eq!(*source.mode().borrow(), SourceMode::Synthetic);

    source.dispose();
    assert_eq!(*source.mode().borrow(), SourceMode::Idle);
}

#[tokio::test]
async fn fallback_stays_off_by_default() {
    let client = FeedClient::new(
        FeedClientConfig {
            url: "ws://127.0.0.1:1".to_string(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                jitter_factor: 0.0,
                ..BackoffConfig::default()
            },
            max_retries: 0,
            ..FeedClientConfig::default()
        },
        TradeCodec::new(),
    );
    let source = BroadcastSource::new(client, BroadcastSourceConfig::default());

    let mut status = source.status();
    let mut handle = source.watch(["KRW-BTC"]).unwrap();
    wait_for_status(&mut status, ConnectionStatus::MaxRetryExceeded).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        tokio::time::timeout(Duration::from_millis(50), handle.recv()).await,
        Err(_)
    ));
    assert_eq!(*source.mode().borrow(), SourceMode::Live);

    source.dispose();
}
