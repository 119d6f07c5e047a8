//! Reference-Counted Fan-Out
//!
//! One upstream feed client shared by many downstream subscribers. The
//! source exclusively owns the subscriber count and the start/stop decision
//! for the client: the first subscriber starts the upstream, the last one
//! leaving arms a grace-period timer that absorbs unsubscribe/resubscribe
//! churn, and set-equal symbol lists attach to the live stream instead of
//! reconnecting.
//!
//! On persistent upstream failure the shared stream can switch to a
//! synthetic sequence (opt-in) so consumers keep receiving data; the switch
//! is observable on the [`SourceMode`] channel.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::FeedCodec;
use crate::domain::status::ConnectionStatus;
use crate::domain::subscription::{SubscriptionError, SubscriptionRequest};
use crate::infrastructure::metrics;
use crate::infrastructure::upbit::client::FeedClient;

/// Configuration for the fan-out source.
#[derive(Debug, Clone)]
pub struct BroadcastSourceConfig {
    /// How long the upstream survives after the last subscriber leaves.
    pub grace_period: std::time::Duration,
    /// Shared stream channel capacity.
    pub capacity: usize,
    /// Switch to a synthetic sequence when the upstream gives up.
    pub synthetic_fallback: bool,
    /// Spacing of generated records in synthetic mode.
    pub synthetic_interval: std::time::Duration,
}

impl Default for BroadcastSourceConfig {
    fn default() -> Self {
        Self {
            grace_period: std::time::Duration::from_secs(5),
            capacity: 1024,
            synthetic_fallback: false,
            synthetic_interval: std::time::Duration::from_secs(1),
        }
    }
}

/// What the shared stream is currently carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// No shared stream exists.
    Idle,
    /// Records come from the upstream connection.
    Live,
    /// Degraded: records are generated locally.
    Synthetic,
}

struct SharedStream<T> {
    tx: broadcast::Sender<T>,
    pump_cancel: CancellationToken,
}

struct SourceInner<T> {
    request: Option<SubscriptionRequest>,
    shared: Option<SharedStream<T>>,
    subscribers: usize,
    teardown_epoch: u64,
}

impl<T> Default for SourceInner<T> {
    fn default() -> Self {
        Self {
            request: None,
            shared: None,
            subscribers: 0,
            teardown_epoch: 0,
        }
    }
}

struct SourceCore<C: FeedCodec> {
    client: Arc<FeedClient<C>>,
    config: BroadcastSourceConfig,
    inner: Mutex<SourceInner<C::Item>>,
    mode_tx: watch::Sender<SourceMode>,
}

/// Reference-counted broadcast source above a [`FeedClient`].
pub struct BroadcastSource<C: FeedCodec> {
    core: Arc<SourceCore<C>>,
}

impl<C: FeedCodec> Clone for BroadcastSource<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<C: FeedCodec> BroadcastSource<C> {
    /// Create a source owning the given client.
    #[must_use]
    pub fn new(client: FeedClient<C>, config: BroadcastSourceConfig) -> Self {
        Self {
            core: Arc::new(SourceCore {
                client: Arc::new(client),
                config,
                inner: Mutex::new(SourceInner::default()),
                mode_tx: watch::channel(SourceMode::Idle).0,
            }),
        }
    }

    /// Attach a subscriber for the given symbol list.
    ///
    /// A set-equal list joins the live shared stream unchanged; anything
    /// else tears the previous stream down and starts a new upstream
    /// subscription. Dropping the returned handle detaches.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Empty`] for an empty symbol list.
    pub fn watch<I, S>(&self, symbols: I) -> Result<FeedHandle<C>, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SubscriptionRequest::new(
            symbols,
            self.core.client.config().max_subscription_count,
        )?;

        let mut inner = self.core.inner.lock();

        let reuse = matches!(
            (&inner.shared, &inner.request),
            (Some(_), Some(current)) if current.is_set_equal(&request)
        );

        let stream_tx = if reuse && let Some(shared) = &inner.shared {
            shared.tx.clone()
        } else {
            teardown_locked(&self.core, &mut inner);
            self.start_stream_locked(&mut inner, request)
        };

        // The only place the count increments; bumping the epoch cancels any
        // pending grace-period teardown.
        inner.subscribers += 1;
        inner.teardown_epoch += 1;

        // Idempotent against a live supervisor; resumes a dormant one.
        if let Some(request) = &inner.request
            && let Err(e) = self.core.client.connect(request.symbols().iter().cloned())
        {
            tracing::warn!(error = %e, "upstream connect rejected the request");
        }

        let id = Uuid::new_v4();
        metrics::set_fanout_subscribers(inner.subscribers);
        tracing::debug!(subscriber = %id, total = inner.subscribers, "fan-out subscriber attached");

        Ok(FeedHandle {
            rx: stream_tx.subscribe(),
            core: Arc::clone(&self.core),
            id,
        })
    }

    fn start_stream_locked(
        &self,
        inner: &mut SourceInner<C::Item>,
        request: SubscriptionRequest,
    ) -> broadcast::Sender<C::Item> {
        let tx = broadcast::channel(self.core.config.capacity).0;
        let pump_cancel = CancellationToken::new();
        // Attach to the client channels before connect() can run, so the
        // first records of a fresh connection are never missed.
        let events = self.core.client.subscribe();
        let status_rx = self.core.client.status();
        tokio::spawn(pump(
            Arc::clone(&self.core),
            events,
            status_rx,
            tx.clone(),
            pump_cancel.clone(),
        ));

        inner.shared = Some(SharedStream {
            tx: tx.clone(),
            pump_cancel,
        });
        inner.request = Some(request);
        self.core.mode_tx.send_replace(SourceMode::Live);
        tx
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscribers(&self) -> usize {
        self.core.inner.lock().subscribers
    }

    /// Observe live/synthetic/idle transitions of the shared stream.
    #[must_use]
    pub fn mode(&self) -> watch::Receiver<SourceMode> {
        self.core.mode_tx.subscribe()
    }

    /// Status transitions of the owned upstream client.
    #[must_use]
    pub fn status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.core.client.status()
    }

    /// The owned upstream client.
    #[must_use]
    pub fn client(&self) -> &FeedClient<C> {
        &self.core.client
    }

    /// Tear down the shared stream and the upstream immediately.
    ///
    /// Idempotent; a later [`BroadcastSource::watch`] starts fresh.
    pub fn dispose(&self) {
        let mut inner = self.core.inner.lock();
        inner.teardown_epoch += 1;
        teardown_locked(&self.core, &mut inner);
    }
}

fn teardown_locked<C: FeedCodec>(core: &SourceCore<C>, inner: &mut SourceInner<C::Item>) {
    if let Some(shared) = inner.shared.take() {
        shared.pump_cancel.cancel();
    }
    if inner.request.take().is_some() {
        core.client.dispose();
    }
    core.mode_tx.send_replace(SourceMode::Idle);
}

fn detach<C: FeedCodec>(core: &Arc<SourceCore<C>>, id: Uuid) {
    let mut inner = core.inner.lock();
    if inner.subscribers == 0 {
        return;
    }
    inner.subscribers -= 1;
    metrics::set_fanout_subscribers(inner.subscribers);
    tracing::debug!(subscriber = %id, remaining = inner.subscribers, "fan-out subscriber detached");

    if inner.subscribers > 0 {
        return;
    }

    inner.teardown_epoch += 1;
    let epoch = inner.teardown_epoch;
    let grace = core.config.grace_period;
    let core = Arc::clone(core);
    drop(inner);

    let deferred = {
        let core = Arc::clone(&core);
        async move {
            tokio::time::sleep(grace).await;
            let mut inner = core.inner.lock();
            if inner.teardown_epoch == epoch && inner.subscribers == 0 {
                tracing::info!("grace period elapsed, tearing down upstream");
                teardown_locked(&core, &mut inner);
            }
        }
    };

    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(deferred);
    } else {
        let mut inner = core.inner.lock();
        if inner.subscribers == 0 {
            teardown_locked(&core, &mut inner);
        }
    }
}

/// Forwards client events (or the synthetic sequence) onto the shared
/// stream. One pump per shared stream.
async fn pump<C: FeedCodec>(
    core: Arc<SourceCore<C>>,
    mut events: broadcast::Receiver<C::Item>,
    mut status_rx: broadcast::Receiver<ConnectionStatus>,
    tx: broadcast::Sender<C::Item>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(core.config.synthetic_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut synthetic = false;
    let mut synthetic_seq: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,

            result = events.recv(), if !synthetic => match result {
                Ok(item) => {
                    let _ = tx.send(item);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "fan-out lagged behind the feed");
                    metrics::record_messages_dropped(missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = ticker.tick(), if synthetic => {
                if let Some(item) = core.client.codec().synthetic(synthetic_seq) {
                    synthetic_seq += 1;
                    metrics::record_synthetic_message();
                    let _ = tx.send(item);
                }
            }

            status = status_rx.recv() => match status {
                Ok(ConnectionStatus::MaxRetryExceeded)
                    if core.config.synthetic_fallback && !synthetic =>
                {
                    tracing::warn!("upstream gave up, switching to synthetic sequence");
                    synthetic = true;
                    core.mode_tx.send_replace(SourceMode::Synthetic);
                }
                Ok(ConnectionStatus::Connected) if synthetic => {
                    tracing::info!("upstream recovered, leaving synthetic mode");
                    synthetic = false;
                    synthetic_seq = 0;
                    core.mode_tx.send_replace(SourceMode::Live);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// A subscriber's handle on the shared stream.
///
/// Dropping the handle detaches the subscriber; the last detach arms the
/// grace-period teardown. Dropping one handle never affects siblings.
pub struct FeedHandle<C: FeedCodec> {
    rx: broadcast::Receiver<C::Item>,
    core: Arc<SourceCore<C>>,
    id: Uuid,
}

impl<C: FeedCodec> FeedHandle<C> {
    /// Receive the next record from the shared stream.
    ///
    /// # Errors
    ///
    /// Returns [`broadcast::error::RecvError::Lagged`] when this subscriber
    /// fell behind, and `Closed` when the shared stream was torn down.
    pub async fn recv(&mut self) -> Result<C::Item, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    /// This subscriber's id (used in logs).
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl<C: FeedCodec> Drop for FeedHandle<C> {
    fn drop(&mut self) {
        detach(&self.core, self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::upbit::backoff::BackoffConfig;
    use crate::infrastructure::upbit::client::FeedClientConfig;
    use crate::infrastructure::upbit::codec::TradeCodec;

    fn source_with_grace(grace: Duration) -> BroadcastSource<TradeCodec> {
        let client = FeedClient::new(
            FeedClientConfig {
                url: "ws://127.0.0.1:1".to_string(),
                max_retries: u32::MAX,
                backoff: BackoffConfig {
                    initial_delay: Duration::from_millis(20),
                    max_delay: Duration::from_millis(40),
                    ..BackoffConfig::default()
                },
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

    #[tokio::test]
    async fn subscribers_are_reference_counted() {
        let source = source_with_grace(Duration::from_millis(50));

        let a = source.watch(["KRW-BTC"]).unwrap();
        let b = source.watch(["KRW-BTC"]).unwrap();
        assert_eq!(source.subscribers(), 2);

        drop(a);
        assert_eq!(source.subscribers(), 1);
        assert!(source.client().is_active());

        drop(b);
        assert_eq!(source.subscribers(), 0);
    }

    #[tokio::test]
    async fn sibling_subscribers_survive_a_detach() {
        let source = source_with_grace(Duration::from_millis(10));

        let a = source.watch(["KRW-BTC"]).unwrap();
        let mut b = source.watch(["KRW-BTC"]).unwrap();
        drop(a);

        tokio::time::sleep(Duration::from_millis(100)).await;

        // b's stream is still open: no Closed error pending.
        assert!(source.client().is_active());
        assert!(matches!(
            tokio::time::timeout(Duration::from_millis(20), b.recv()).await,
            Err(_)
        ));
    }

    #[tokio::test]
    async fn last_detach_tears_down_after_grace() {
        let source = source_with_grace(Duration::from_millis(30));

        let handle = source.watch(["KRW-BTC"]).unwrap();
        assert!(source.client().is_active());
        drop(handle);

        // Still alive inside the window.
        assert!(source.client().is_active());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!source.client().is_active());
        assert_eq!(*source.mode().borrow(), SourceMode::Idle);
    }

    #[tokio::test]
    async fn resubscribe_within_grace_cancels_teardown() {
        let source = source_with_grace(Duration::from_millis(100));

        let first = source.watch(["KRW-BTC"]).unwrap();
        drop(first);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _second = source.watch(["KRW-BTC"]).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(source.client().is_active());
        assert_eq!(source.subscribers(), 1);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_reusable() {
        let source = source_with_grace(Duration::from_millis(10));

        let _handle = source.watch(["KRW-BTC"]).unwrap();
        source.dispose();
        source.dispose();
        assert!(!source.client().is_active());
        assert_eq!(*source.mode().borrow(), SourceMode::Idle);

        let _again = source.watch(["KRW-BTC"]).unwrap();
        assert!(source.client().is_active());
        assert_eq!(*source.mode().borrow(), SourceMode::Live);
    }

    #[tokio::test]
    async fn empty_watch_is_rejected() {
        let source = source_with_grace(Duration::from_millis(10));
        assert!(source.watch(Vec::<String>::new()).is_err());
        assert_eq!(source.subscribers(), 0);
    }
}
