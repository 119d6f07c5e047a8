//! Trade Records
//!
//! Canonical internal representation of a decoded trade, independent of the
//! wire format. The `(market, sequence_id)` pair identifies a trade across
//! re-deliveries and is the dedup key after a reconnect.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Seller-initiated.
    Ask,
    /// Buyer-initiated.
    Bid,
}

impl Side {
    /// Stable name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Bid => "bid",
        }
    }
}

/// Dedup identity of a trade: market plus exchange sequence id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeKey {
    /// Market code (e.g. `KRW-BTC`).
    pub market: String,
    /// Exchange-assigned sequence id.
    pub sequence_id: u64,
}

/// A decoded trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Market code (e.g. `KRW-BTC`).
    pub market: String,
    /// Trade price.
    pub price: Decimal,
    /// Trade volume.
    pub volume: Decimal,
    /// Taker side.
    pub side: Side,
    /// Exchange-assigned sequence id.
    pub sequence_id: u64,
    /// Trade timestamp in epoch milliseconds.
    pub timestamp_ms: i64,
}

impl TradeRecord {
    /// The dedup key for this trade.
    #[must_use]
    pub fn key(&self) -> TradeKey {
        TradeKey {
            market: self.market.clone(),
            sequence_id: self.sequence_id,
        }
    }

    /// The trade timestamp as UTC, if in chrono's representable range.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(market: &str, sequence_id: u64) -> TradeRecord {
        TradeRecord {
            market: market.to_string(),
            price: Decimal::new(81_500_000, 0),
            volume: Decimal::new(25, 3),
            side: Side::Bid,
            sequence_id,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn key_matches_market_and_sequence() {
        let trade = record("KRW-BTC", 42);
        let key = trade.key();
        assert_eq!(key.market, "KRW-BTC");
        assert_eq!(key.sequence_id, 42);
    }

    #[test]
    fn same_sequence_different_market_is_a_different_key() {
        assert_ne!(record("KRW-BTC", 42).key(), record("KRW-ETH", 42).key());
        assert_eq!(record("KRW-BTC", 42).key(), record("KRW-BTC", 42).key());
    }

    #[test]
    fn timestamp_converts_to_utc() {
        let trade = record("KRW-BTC", 1);
        let ts = trade.timestamp().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn side_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Side::Ask).unwrap(), "\"ASK\"");
        assert_eq!(serde_json::to_string(&Side::Bid).unwrap(), "\"BID\"");
    }
}
