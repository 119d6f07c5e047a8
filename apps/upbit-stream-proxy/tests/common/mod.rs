//! Shared test harness: a local mock exchange server.
//!
//! Binds a real WebSocket listener on `127.0.0.1:0`, records every accepted
//! connection and subscribe frame, and then follows the configured behavior.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use upbit_stream_proxy::{ConnectionStatus, HeartbeatConfig};

/// What the mock server does after reading the subscribe frame.
#[derive(Debug, Clone)]
pub enum ServerBehavior {
    /// Send the given payloads, then stay open answering ping frames.
    ServeTrades(Vec<String>),
    /// Drop the connection immediately.
    DropAfterSubscribe,
    /// Stay open but never send anything.
    Silent,
}

/// Handle on a running mock exchange.
pub struct MockExchange {
    /// `ws://` URL of the listener.
    pub url: String,
    accepted: Arc<AtomicU64>,
    subscribes: Arc<Mutex<Vec<String>>>,
}

impl MockExchange {
    /// Number of connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Subscribe frames received so far, in arrival order.
    pub fn subscribe_frames(&self) -> Vec<String> {
        self.subscribes.lock().clone()
    }
}

/// Start a mock exchange applying `behavior` to every connection.
pub async fn spawn(behavior: ServerBehavior) -> MockExchange {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepted = Arc::new(AtomicU64::new(0));
    let subscribes = Arc::new(Mutex::new(Vec::new()));

    let accept_counter = Arc::clone(&accepted);
    let subscribe_log = Arc::clone(&subscribes);
    tokio::spawn(async move {
        let mut incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
        while let Some(Ok(stream)) = incoming.next().await {
            accept_counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handle_connection(
                stream,
                Arc::clone(&subscribe_log),
                behavior.clone(),
            ));
        }
    });

    MockExchange {
        url: format!("ws://{addr}"),
        accepted,
        subscribes,
    }
}

async fn handle_connection(
    stream: TcpStream,
    subscribes: Arc<Mutex<Vec<String>>>,
    behavior: ServerBehavior,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    match read.next().await {
        Some(Ok(Message::Text(text))) => subscribes.lock().push(text.as_str().to_string()),
        _ => return,
    }

    match behavior {
        ServerBehavior::DropAfterSubscribe => {}
        ServerBehavior::ServeTrades(payloads) => {
            for payload in payloads {
                if write.send(Message::Text(payload.into())).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(message)) = read.next().await {
                match message {
                    Message::Text(text) if text.as_str().contains(r#""type":"ping""#) => {
                        let _ = write
                            .send(Message::Text(r#"{"status":"UP"}"#.into()))
                            .await;
                    }
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => return,
                    _ => {}
                }
            }
        }
        ServerBehavior::Silent => while let Some(Ok(_)) = read.next().await {},
    }
}

/// A DEFAULT-format trade payload.
pub fn trade_json(market: &str, sequence_id: u64, price: &str) -> String {
    format!(
        r#"{{"type":"trade","code":"{market}","trade_price":{price},
            "trade_volume":0.025,"ask_bid":"BID","sequential_id":{sequence_id},
            "timestamp":1700000000123}}"#
    )
}

/// Fast heartbeat for tests that should not time out.
pub fn quiet_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig::new(Duration::from_secs(30), Duration::from_secs(10))
}

/// Await a specific status, failing after five seconds.
pub async fn wait_for_status(
    rx: &mut tokio::sync::broadcast::Receiver<ConnectionStatus>,
    expected: ConnectionStatus,
) -> Vec<ConnectionStatus> {
    let mut observed = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}, saw {observed:?}"))
            .expect("status channel closed");
        observed.push(status);
        if status == expected {
            return observed;
        }
    }
}
