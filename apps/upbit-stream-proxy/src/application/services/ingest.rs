//! Ingest Service: Dedup + Bounded Cache
//!
//! Consumes the fan-out stream, drops re-deliveries by `(market,
//! sequence_id)`, persists admitted trades to the rolling store, and
//! forwards them to downstream consumers.
//!
//! Both bounds use batch eviction: the dedup set sheds its oldest quarter
//! in one sweep, and the store is trimmed back to the target size only once
//! the high-water mark is crossed, never one record at a time.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedCodec, StoreError, TradeStore};
use crate::domain::trade::{TradeKey, TradeRecord};
use crate::infrastructure::broadcast::FeedHandle;
use crate::infrastructure::metrics;

// =============================================================================
// Dedup Gate
// =============================================================================

/// Bounded seen-set keyed by `(market, sequence_id)`.
#[derive(Debug)]
pub struct DedupGate {
    seen: HashSet<TradeKey>,
    order: VecDeque<TradeKey>,
    capacity: usize,
}

impl DedupGate {
    /// Create a gate holding at most `capacity` keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Admit a key. Returns `false` if it was already seen.
    ///
    /// When the set outgrows its capacity the oldest quarter is evicted in
    /// one batch.
    pub fn admit(&mut self, key: TradeKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }

        self.order.push_back(key.clone());
        self.seen.insert(key);

        if self.seen.len() > self.capacity {
            let batch = (self.capacity / 4).max(1);
            for _ in 0..batch {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
            tracing::debug!(evicted = batch, retained = self.seen.len(), "dedup set trimmed");
        }

        true
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// =============================================================================
// Ingest Service
// =============================================================================

/// Configuration for the ingest service.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Dedup seen-set capacity.
    pub dedup_capacity: usize,
    /// Store size restored after an eviction batch.
    pub cache_target: usize,
    /// Store size that triggers an eviction batch.
    pub cache_high_water: usize,
    /// Forwarded-stream channel capacity.
    pub forward_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 1000,
            cache_target: 1000,
            cache_high_water: 1200,
            forward_capacity: 1024,
        }
    }
}

/// Dedup gate plus bounded rolling cache over the trade store.
pub struct IngestService {
    store: Arc<dyn TradeStore>,
    dedup: parking_lot::Mutex<DedupGate>,
    config: IngestConfig,
    evicting: AtomicBool,
    forward_tx: broadcast::Sender<TradeRecord>,
}

impl IngestService {
    /// Create a service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn TradeStore>, config: IngestConfig) -> Self {
        let dedup = parking_lot::Mutex::new(DedupGate::new(config.dedup_capacity));
        let forward_tx = broadcast::channel(config.forward_capacity).0;
        Self {
            store,
            dedup,
            config,
            evicting: AtomicBool::new(false),
            forward_tx,
        }
    }

    /// Subscribe to the deduped, persisted trade stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TradeRecord> {
        self.forward_tx.subscribe()
    }

    /// The most recent admitted trades, newest first.
    ///
    /// # Errors
    ///
    /// Propagates store backend errors.
    pub async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        self.store.recent(limit).await
    }

    /// Admit one trade: dedup, persist, forward.
    ///
    /// Returns `false` when the trade was a re-delivery and got dropped.
    ///
    /// # Errors
    ///
    /// Propagates store backend errors; the trade still counts as seen.
    pub async fn ingest(&self, trade: TradeRecord) -> Result<bool, StoreError> {
        if !self.dedup.lock().admit(trade.key()) {
            metrics::record_duplicate_dropped();
            tracing::trace!(
                market = %trade.market,
                sequence_id = trade.sequence_id,
                "duplicate trade dropped"
            );
            return Ok(false);
        }

        self.store.insert(&trade).await?;
        let _ = self.forward_tx.send(trade);
        self.maybe_evict().await?;
        Ok(true)
    }

    /// Run one high-water-mark eviction batch if due.
    ///
    /// The guard keeps concurrent ingests from stacking eviction batches;
    /// whoever loses the race simply skips, the winner restores the target.
    async fn maybe_evict(&self) -> Result<(), StoreError> {
        if self.store.count().await? <= self.config.cache_high_water {
            return Ok(());
        }

        if self
            .evicting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let result = async {
            let count = self.store.count().await?;
            if count > self.config.cache_high_water {
                let excess = count - self.config.cache_target;
                let removed = self.store.evict_oldest(excess).await?;
                metrics::record_cache_eviction(removed as u64);
                tracing::debug!(removed, target = self.config.cache_target, "cache eviction batch");
            }
            Ok(())
        }
        .await;

        self.evicting.store(false, Ordering::Release);
        result
    }

    /// Pump a fan-out subscription through the service until it closes or
    /// the token cancels.
    ///
    /// Store errors are logged and skipped; a flaky store must not kill the
    /// pipeline.
    pub async fn run<C>(self: Arc<Self>, mut feed: FeedHandle<C>, cancel: CancellationToken)
    where
        C: FeedCodec<Item = TradeRecord>,
    {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                result = feed.recv() => match result {
                    Ok(trade) => {
                        if let Err(e) = self.ingest(trade).await {
                            tracing::error!(error = %e, "trade store rejected a write");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "ingest lagged behind the fan-out");
                        metrics::record_messages_dropped(missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("ingest pump exited");
    }
}
