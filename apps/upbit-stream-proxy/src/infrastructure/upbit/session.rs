//! Connection Session
//!
//! Owns one physical WebSocket: connects, sends the subscribe frame through
//! the rate limiter, pumps inbound frames through the codec, and reports how
//! the connection ended. Reconnection policy lives one level up in the
//! client; a session never retries anything itself.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedCodec;
use crate::domain::status::ConnectionStatus;
use crate::infrastructure::metrics;
use crate::infrastructure::upbit::client::StatusSender;
use crate::infrastructure::upbit::codec::normalize;
use crate::infrastructure::upbit::heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState,
};
use crate::infrastructure::upbit::messages::ping_frame;
use crate::infrastructure::upbit::rate_limit::RateLimiter;

/// Why an established session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// The peer closed the connection or the inbound stream completed.
    Closed,
    /// The transport reported an error.
    Error(String),
    /// No inbound traffic within the pong timeout after a ping.
    PongTimeout,
    /// The session was cancelled from above.
    Cancelled,
}

/// Errors before a session is established.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SessionError {
    /// The socket could not be opened.
    #[error("WebSocket connection failed: {0}")]
    Connect(tokio_tungstenite::tungstenite::Error),

    /// The subscribe frame could not be sent.
    #[error("failed to send subscribe frame: {0}")]
    Subscribe(tokio_tungstenite::tungstenite::Error),
}

/// Everything one session needs, borrowed from the client supervisor.
pub(crate) struct SessionContext<C: FeedCodec> {
    /// Feed endpoint URL.
    pub url: String,
    /// Pre-encoded subscribe frame for this generation's symbol list.
    pub subscribe_frame: String,
    /// Caller-supplied codec.
    pub codec: Arc<C>,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Minimum spacing between outbound control frames.
    pub min_send_interval: Duration,
    /// Decoded-message fan-out.
    pub events: broadcast::Sender<C::Item>,
    /// Status publisher.
    pub status: StatusSender,
    /// Generation cancellation token.
    pub cancel: CancellationToken,
}

/// Connect, subscribe, and pump until the transport dies or we are
/// cancelled.
///
/// `Err` means the session never established (no `Connected` status was
/// published); `Ok` carries the reason an established session ended.
pub(crate) async fn run<C: FeedCodec>(
    ctx: &SessionContext<C>,
) -> Result<SessionEnd, SessionError> {
    tracing::info!(url = %ctx.url, "connecting to feed");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(ctx.url.as_str())
        .await
        .map_err(SessionError::Connect)?;
    let (mut write, mut read) = ws_stream.split();

    // All frames this session originates go through the limiter, the
    // subscribe frame included.
    let (limiter, mut paced) = RateLimiter::channel(ctx.min_send_interval);
    limiter.enqueue(ctx.subscribe_frame.clone());

    let Some(frame) = paced.recv().await else {
        return Ok(SessionEnd::Cancelled);
    };
    write
        .send(Message::Text(frame.into()))
        .await
        .map_err(SessionError::Subscribe)?;

    ctx.status.publish(ConnectionStatus::Connected);
    tracing::info!("feed connected and subscribed");

    let hb_state = Arc::new(HeartbeatState::new());
    let (hb_tx, mut hb_rx) = mpsc::channel::<HeartbeatEvent>(8);
    let hb_cancel = ctx.cancel.child_token();
    let monitor = HeartbeatMonitor::new(
        ctx.heartbeat.clone(),
        Arc::clone(&hb_state),
        hb_tx,
        hb_cancel.clone(),
    );
    let _monitor_handle = tokio::spawn(monitor.run());

    let end = loop {
        tokio::select! {
            () = ctx.cancel.cancelled() => break SessionEnd::Cancelled,

            event = hb_rx.recv() => match event {
                Some(HeartbeatEvent::SendPing) => {
                    limiter.enqueue(ping_frame());
                }
                Some(HeartbeatEvent::Timeout) => break SessionEnd::PongTimeout,
                None => {
                    tracing::debug!("heartbeat channel closed");
                }
            },

            frame = paced.recv() => {
                if let Some(text) = frame
                    && let Err(e) = write.send(Message::Text(text.into())).await
                {
                    tracing::warn!(error = %e, "outbound send failed");
                    break SessionEnd::Error(e.to_string());
                }
            }

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    hb_state.record_traffic();
                    handle_payload(ctx, text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    hb_state.record_traffic();
                    match std::str::from_utf8(&data) {
                        Ok(text) => handle_payload(ctx, text),
                        Err(e) => {
                            tracing::warn!(error = %e, "non-UTF-8 binary frame dropped");
                            metrics::record_decode_failure();
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    hb_state.record_traffic();
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        break SessionEnd::Error(e.to_string());
                    }
                }
                Some(Ok(Message::Pong(_))) => hb_state.record_traffic(),
                Some(Ok(Message::Close(_))) => {
                    tracing::info!("server sent close frame");
                    break SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break SessionEnd::Error(e.to_string()),
                None => {
                    tracing::info!("inbound stream ended");
                    break SessionEnd::Closed;
                }
            },
        }
    };

    hb_cancel.cancel();
    limiter.dispose();
    Ok(end)
}

/// Normalize and decode one inbound payload.
///
/// Decode failures are logged and dropped; they never end the session.
fn handle_payload<C: FeedCodec>(ctx: &SessionContext<C>, text: &str) {
    let records = match normalize(text) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable payload dropped");
            metrics::record_decode_failure();
            return;
        }
    };

    for record in records {
        match ctx.codec.decode(&record) {
            Ok(Some(item)) => {
                metrics::record_message_received();
                // No receivers is fine; the fan-out may not be attached yet.
                let _ = ctx.events.send(item);
            }
            Ok(None) => tracing::trace!("control record skipped"),
            Err(e) => {
                tracing::warn!(error = %e, "record decode failed, dropped");
                metrics::record_decode_failure();
            }
        }
    }
}
