//! In-Memory Trade Store
//!
//! The default [`TradeStore`] adapter: a rolling window held in memory.
//! Persistent storage formats are a collaborator concern; anything that can
//! satisfy the port can replace this.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::application::ports::{StoreError, TradeStore};
use crate::domain::trade::TradeRecord;

/// Rolling in-memory trade window.
#[derive(Debug, Default)]
pub struct MemoryTradeStore {
    rows: Mutex<VecDeque<TradeRecord>>,
}

impl MemoryTradeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TradeStore for MemoryTradeStore {
    async fn insert(&self, trade: &TradeRecord) -> Result<(), StoreError> {
        self.rows.lock().push_back(trade.clone());
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.rows.lock().len())
    }

    async fn evict_oldest(&self, n: usize) -> Result<usize, StoreError> {
        let mut rows = self.rows.lock();
        let removed = n.min(rows.len());
        rows.drain(..removed);
        Ok(removed)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let rows = self.rows.lock();
        Ok(rows.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::trade::Side;

    fn trade(sequence_id: u64) -> TradeRecord {
        TradeRecord {
            market: "KRW-BTC".to_string(),
            price: Decimal::new(81_500_000, 0),
            volume: Decimal::ONE,
            side: Side::Bid,
            sequence_id,
            timestamp_ms: 1_700_000_000_000 + i64::try_from(sequence_id).unwrap_or(0),
        }
    }

    #[tokio::test]
    async fn insert_and_count() {
        let store = MemoryTradeStore::new();
        for i in 0..5 {
            store.insert(&trade(i)).await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn evicts_oldest_first() {
        let store = MemoryTradeStore::new();
        for i in 0..10 {
            store.insert(&trade(i)).await.unwrap();
        }

        let removed = store.evict_oldest(4).await.unwrap();
        assert_eq!(removed, 4);
        assert_eq!(store.count().await.unwrap(), 6);

        let remaining = store.recent(10).await.unwrap();
        assert!(remaining.iter().all(|t| t.sequence_id >= 4));
    }

    #[tokio::test]
    async fn evict_more_than_stored_drains_everything() {
        let store = MemoryTradeStore::new();
        store.insert(&trade(1)).await.unwrap();
        assert_eq!(store.evict_oldest(10).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let store = MemoryTradeStore::new();
        for i in 0..5 {
            store.insert(&trade(i)).await.unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sequence_id, 4);
        assert_eq!(recent[1].sequence_id, 3);
    }
}
