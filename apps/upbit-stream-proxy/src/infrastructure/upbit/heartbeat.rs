//! Heartbeat Monitor
//!
//! Schedules application-level pings and detects silently-dead connections.
//! Each ping arms a pong timeout; any inbound frame recorded on the shared
//! state disarms it. Liveness is inferred from any traffic, not strictly a
//! heartbeat reply (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
///
/// The pong timeout should be shorter than the ping interval; a timeout
/// window is armed after each ping and checked before the next one.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// How long after a ping inbound silence is tolerated.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// A ping frame should be enqueued now.
    SendPing,
    /// No inbound traffic arrived within the timeout; the connection is dead.
    Timeout,
}

/// Traffic state shared between the monitor and the session read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_traffic: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state with the clock starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_traffic: RwLock::new(Instant::now()),
        }
    }

    /// Record that an inbound frame arrived.
    pub fn record_traffic(&self) {
        *self.last_traffic.write() = Instant::now();
    }

    /// When the last inbound frame arrived.
    #[must_use]
    pub fn last_traffic(&self) -> Instant {
        *self.last_traffic.read()
    }
}

/// Heartbeat monitor task.
///
/// Runs until cancelled or a timeout is detected. The session enqueues the
/// actual ping frame (through its rate limiter) when it receives
/// [`HeartbeatEvent::SendPing`].
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a new monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the ping/timeout loop.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the first ping should come
        // one interval after the subscribe frame.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("heartbeat monitor cancelled");
                    return;
                }
                _ = interval.tick() => {}
            }

            let armed_at = Instant::now();
            if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                tracing::debug!("heartbeat channel closed, stopping monitor");
                return;
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("heartbeat monitor cancelled");
                    return;
                }
                () = tokio::time::sleep(self.config.pong_timeout) => {
                    if self.state.last_traffic() <= armed_at {
                        tracing::warn!(
                            timeout_ms = self.config.pong_timeout.as_millis(),
                            "no inbound traffic after ping"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                        return;
                    }
                }
            }
        }
    }
}
