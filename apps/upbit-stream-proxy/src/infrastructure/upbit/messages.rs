//! Upbit WebSocket Message Types
//!
//! Wire format types for the Upbit-style feed protocol.
//!
//! # Outbound
//!
//! The subscribe frame is a three-element JSON array:
//!
//! ```json
//! [{"ticket":"trade-1700000000000"},
//!  {"type":"trade","codes":["KRW-BTC","KRW-ETH"]},
//!  {"format":"DEFAULT"}]
//! ```
//!
//! The heartbeat frame is a single object: `{"type":"ping"}`.
//!
//! # Inbound
//!
//! Data records use the DEFAULT field naming (`code`, `trade_price`,
//! `trade_volume`, `ask_bid`, `sequential_id`, `timestamp`). The server
//! answers heartbeats with `{"status":"UP"}`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::subscription::Symbol;
use crate::domain::trade::{Side, TradeRecord};

// =============================================================================
// Outbound Frames
// =============================================================================

/// Ticket section of the subscribe frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSection {
    /// Request identifier, `<feed-type>-<epoch-ms>`.
    pub ticket: String,
}

/// Body section of the subscribe frame: feed type plus market codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodySection {
    /// Feed type (e.g. `trade`).
    #[serde(rename = "type")]
    pub feed_type: String,
    /// Market codes, already truncated to the subscription cap.
    pub codes: Vec<Symbol>,
}

/// Format section of the subscribe frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSection {
    /// Payload format; this client always requests `DEFAULT`.
    pub format: String,
}

/// The full subscribe frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFrame {
    /// Ticket section.
    pub ticket: TicketSection,
    /// Feed type and codes.
    pub body: BodySection,
    /// Payload format.
    pub format: FormatSection,
}

impl SubscribeFrame {
    /// Build a subscribe frame for `feed_type` with a `<type>-<epoch-ms>`
    /// ticket.
    #[must_use]
    pub fn new(feed_type: &str, codes: &[Symbol], epoch_ms: i64) -> Self {
        Self {
            ticket: TicketSection {
                ticket: format!("{feed_type}-{epoch_ms}"),
            },
            body: BodySection {
                feed_type: feed_type.to_string(),
                codes: codes.to_vec(),
            },
            format: FormatSection {
                format: "DEFAULT".to_string(),
            },
        }
    }

    /// Serialize to the three-element array wire shape.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&(&self.ticket, &self.body, &self.format))
    }
}

/// The outbound heartbeat frame, `{"type":"ping"}`.
#[must_use]
pub fn ping_frame() -> String {
    r#"{"type":"ping"}"#.to_string()
}

// =============================================================================
// Inbound Records
// =============================================================================

/// A trade record in DEFAULT format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeMessage {
    /// Record type (always `trade`).
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Market code.
    pub code: String,

    /// Trade price.
    pub trade_price: Decimal,

    /// Trade volume.
    pub trade_volume: Decimal,

    /// Taker side, `ASK` or `BID`.
    pub ask_bid: Side,

    /// Exchange sequence id.
    pub sequential_id: u64,

    /// Delivery timestamp in epoch milliseconds.
    pub timestamp: i64,

    /// Execution timestamp in epoch milliseconds, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_timestamp: Option<i64>,

    /// `REALTIME` or `SNAPSHOT`, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
}

impl From<TradeMessage> for TradeRecord {
    fn from(msg: TradeMessage) -> Self {
        let timestamp_ms = msg.trade_timestamp.unwrap_or(msg.timestamp);
        Self {
            market: msg.code,
            price: msg.trade_price,
            volume: msg.trade_volume,
            side: msg.ask_bid,
            sequence_id: msg.sequential_id,
            timestamp_ms,
        }
    }
}

/// Heartbeat reply, `{"status":"UP"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Server-reported status.
    pub status: String,
}
