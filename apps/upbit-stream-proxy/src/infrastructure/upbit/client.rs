//! Reconnecting Feed Client
//!
//! Wraps the connection session in a reconnect supervisor: one logical
//! decoded-message stream and status channel survive any number of physical
//! connections. Generic over a caller-supplied [`FeedCodec`] so the same
//! machinery serves any feed type.
//!
//! # State machine
//!
//! ```text
//! idle ──connect()──► connecting ──ok──► connected
//!   ▲                     │ fail             │ close/error/pong-timeout
//!   │                     ▼                  ▼
//!   │                  failed ───────► reconnecting ──backoff──► connecting
//!   │                                        │ retry budget spent
//!   └───────────────── max_retry_exceeded ◄──┘
//! ```
//!
//! `max_retry_exceeded` is dormancy, not an error: the retry counter resets
//! and a later `connect()` starts over.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedCodec;
use crate::domain::status::ConnectionStatus;
use crate::domain::subscription::{SubscriptionError, SubscriptionRequest};
use crate::infrastructure::metrics;
use crate::infrastructure::upbit::backoff::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::upbit::heartbeat::HeartbeatConfig;
use crate::infrastructure::upbit::session::{self, SessionContext, SessionEnd};

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Feed endpoint URL.
    pub url: String,
    /// Maximum number of symbols per subscription.
    pub max_subscription_count: usize,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Backoff settings.
    pub backoff: BackoffConfig,
    /// Retries per dormancy cycle (`0` goes dormant after the first failure).
    pub max_retries: u32,
    /// Minimum spacing between outbound control frames.
    pub min_send_interval: Duration,
    /// Decoded-message channel capacity.
    pub events_capacity: usize,
    /// Status channel capacity.
    pub status_capacity: usize,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.upbit.com/websocket/v1".to_string(),
            max_subscription_count: 30,
            heartbeat: HeartbeatConfig::default(),
            backoff: BackoffConfig::default(),
            max_retries: 5,
            min_send_interval: Duration::from_millis(500),
            events_capacity: 1024,
            status_capacity: 64,
        }
    }
}

/// Status publisher shared between the supervisor and its sessions.
#[derive(Debug, Clone)]
pub(crate) struct StatusSender {
    tx: broadcast::Sender<ConnectionStatus>,
    current: Arc<RwLock<ConnectionStatus>>,
}

impl StatusSender {
    fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
            current: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
        }
    }

    pub(crate) fn publish(&self, status: ConnectionStatus) {
        *self.current.write() = status;
        tracing::debug!(status = %status, "connection status");
        let _ = self.tx.send(status);
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    fn current(&self) -> ConnectionStatus {
        *self.current.read()
    }
}

struct ClientCore<C: FeedCodec> {
    config: FeedClientConfig,
    codec: Arc<C>,
    events_tx: broadcast::Sender<C::Item>,
    status: StatusSender,
    backoff: Mutex<BackoffPolicy>,
    attempts: AtomicU64,
}

struct Generation {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct ClientInner {
    request: Option<SubscriptionRequest>,
    generation: Option<Generation>,
}

/// Reconnecting WebSocket client for one logical feed.
///
/// Owns the upstream connection and its outbound queue exclusively; all
/// consumers share the decoded stream via [`FeedClient::subscribe`].
pub struct FeedClient<C: FeedCodec> {
    core: Arc<ClientCore<C>>,
    inner: Mutex<ClientInner>,
}

impl<C: FeedCodec> FeedClient<C> {
    /// Create a client. No connection is made until [`FeedClient::connect`].
    #[must_use]
    pub fn new(config: FeedClientConfig, codec: C) -> Self {
        let events_tx = broadcast::channel(config.events_capacity).0;
        let status = StatusSender::new(config.status_capacity);
        let backoff = Mutex::new(BackoffPolicy::new(config.backoff.clone()));

        Self {
            core: Arc::new(ClientCore {
                config,
                codec: Arc::new(codec),
                events_tx,
                status,
                backoff,
                attempts: AtomicU64::new(0),
            }),
            inner: Mutex::new(ClientInner::default()),
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &FeedClientConfig {
        &self.core.config
    }

    /// The injected codec.
    #[must_use]
    pub fn codec(&self) -> Arc<C> {
        Arc::clone(&self.core.codec)
    }

    /// Start (or retarget) the connection supervisor.
    ///
    /// Idempotent and re-entrant: a set-equal symbol list against a live
    /// supervisor is a no-op; a different list tears the current session
    /// down and reconnects with the new one; a dormant or disposed client
    /// starts fresh.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Empty`] for an empty symbol list. Lists
    /// over the configured maximum are truncated, not rejected.
    pub fn connect<I, S>(&self, symbols: I) -> Result<(), SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request =
            SubscriptionRequest::new(symbols, self.core.config.max_subscription_count)?;

        let mut inner = self.inner.lock();

        if let Some(generation) = &inner.generation {
            let live = !generation.handle.is_finished() && !generation.cancel.is_cancelled();
            if live
                && let Some(current) = &inner.request
                && current.is_set_equal(&request)
            {
                tracing::debug!("connect with set-equal symbols, keeping session");
                return Ok(());
            }
            generation.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.core),
            request.clone(),
            cancel.clone(),
        ));

        inner.request = Some(request);
        inner.generation = Some(Generation { cancel, handle });
        Ok(())
    }

    /// Subscribe to the decoded-message stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<C::Item> {
        self.core.events_tx.subscribe()
    }

    /// Subscribe to status transitions, delivered in order.
    #[must_use]
    pub fn status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.core.status.subscribe()
    }

    /// The most recently published status.
    #[must_use]
    pub fn current_status(&self) -> ConnectionStatus {
        self.core.status.current()
    }

    /// Total upstream connection attempts since construction.
    #[must_use]
    pub fn connection_attempts(&self) -> u64 {
        self.core.attempts.load(Ordering::Relaxed)
    }

    /// Whether a supervisor is currently live (connected or retrying).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner
            .lock()
            .generation
            .as_ref()
            .is_some_and(|g| !g.handle.is_finished() && !g.cancel.is_cancelled())
    }

    /// The symbol list served by the current or most recent supervisor.
    #[must_use]
    pub fn current_request(&self) -> Option<SubscriptionRequest> {
        self.inner.lock().request.clone()
    }

    /// Stop the supervisor, close the socket, and clear the outbound queue.
    ///
    /// Idempotent; a later [`FeedClient::connect`] starts a fresh
    /// generation.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        if let Some(generation) = inner.generation.take() {
            generation.cancel.cancel();
            self.core.status.publish(ConnectionStatus::Disconnected);
        }
        inner.request = None;
    }
}

impl<C: FeedCodec> Drop for FeedClient<C> {
    fn drop(&mut self) {
        if let Some(generation) = self.inner.lock().generation.take() {
            generation.cancel.cancel();
        }
    }
}

/// Reconnect supervisor: one live instance per client generation.
///
/// Being the only task that drives sessions for its generation is what
/// guarantees no overlapping reconnect attempts.
async fn supervise<C: FeedCodec>(
    core: Arc<ClientCore<C>>,
    request: SubscriptionRequest,
    cancel: CancellationToken,
) {
    let mut retry_count: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        core.status.publish(ConnectionStatus::Connecting);
        core.attempts.fetch_add(1, Ordering::Relaxed);

        let subscribe_frame = match core.codec.encode_subscribe(request.symbols()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "subscribe frame encoding failed");
                core.status.publish(ConnectionStatus::Failed);
                core.backoff.lock().record_failure();
                match schedule_retry(&core, &cancel, &mut retry_count).await {
                    ControlFlow::Continue(()) => continue,
                    ControlFlow::Break(()) => break,
                }
            }
        };

        let ctx = SessionContext {
            url: core.config.url.clone(),
            subscribe_frame,
            codec: Arc::clone(&core.codec),
            heartbeat: core.config.heartbeat.clone(),
            min_send_interval: core.config.min_send_interval,
            events: core.events_tx.clone(),
            status: core.status.clone(),
            cancel: cancel.clone(),
        };

        match session::run(&ctx).await {
            Ok(end) => {
                // The session was established, so the retry budget refills.
                retry_count = 0;
                core.backoff.lock().record_success();

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::PongTimeout => {
                        core.status.publish(ConnectionStatus::PongTimeout);
                    }
                    SessionEnd::Closed => {
                        core.status.publish(ConnectionStatus::Disconnected);
                    }
                    SessionEnd::Error(e) => {
                        tracing::warn!(error = %e, "feed transport error");
                        core.status.publish(ConnectionStatus::Error);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection attempt failed");
                core.status.publish(ConnectionStatus::Failed);
            }
        }

        core.backoff.lock().record_failure();
        metrics::record_reconnect();

        if schedule_retry(&core, &cancel, &mut retry_count)
            .await
            .is_break()
        {
            break;
        }
    }

    tracing::debug!("feed supervisor exited");
}

/// Publish `Reconnecting` and wait out the backoff delay, or go dormant if
/// the retry budget is spent.
async fn schedule_retry<C: FeedCodec>(
    core: &ClientCore<C>,
    cancel: &CancellationToken,
    retry_count: &mut u32,
) -> ControlFlow<()> {
    if *retry_count >= core.config.max_retries {
        tracing::warn!(
            max_retries = core.config.max_retries,
            "retry budget exhausted, going dormant until the next connect()"
        );
        core.status.publish(ConnectionStatus::MaxRetryExceeded);
        *retry_count = 0;
        return ControlFlow::Break(());
    }

    *retry_count += 1;
    core.status.publish(ConnectionStatus::Reconnecting);

    let delay = core.backoff.lock().calculate_backoff(
        *retry_count,
        core.config.backoff.initial_delay,
        core.config.backoff.max_delay,
    );
    tracing::info!(
        retry = *retry_count,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "reconnecting after backoff"
    );

    tokio::select! {
        () = cancel.cancelled() => ControlFlow::Break(()),
        () = tokio::time::sleep(delay) => ControlFlow::Continue(()),
    }
}
