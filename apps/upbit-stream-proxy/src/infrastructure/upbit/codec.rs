//! Feed Codec
//!
//! Normalizes inbound JSON payloads and implements the trade-feed codec.
//!
//! The exchange sends either a JSON array of records or a single record
//! object; both shapes normalize to a list of string-keyed maps before any
//! feed-specific decoding happens.

use rust_decimal::Decimal;

use crate::application::ports::{CodecError, FeedCodec, RawRecord};
use crate::domain::subscription::Symbol;
use crate::domain::trade::{Side, TradeRecord};
use crate::infrastructure::upbit::messages::{SubscribeFrame, TradeMessage};

/// Normalize a text payload into a list of records.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFormat`] when the payload is neither an
/// object nor an array of objects, and [`CodecError::Json`] on parse errors.
pub fn normalize(text: &str) -> Result<Vec<RawRecord>, CodecError> {
    let trimmed = text.trim();

    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match value {
                serde_json::Value::Object(map) => records.push(map),
                other => {
                    return Err(CodecError::InvalidFormat(format!(
                        "expected array of objects, got element: {other}"
                    )));
                }
            }
        }
        Ok(records)
    } else if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        match value {
            serde_json::Value::Object(map) => Ok(vec![map]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {other}"
            ))),
        }
    } else {
        Err(CodecError::InvalidFormat(format!(
            "expected JSON array or object, got: {}...",
            &trimmed[..trimmed.len().min(50)]
        )))
    }
}

/// Market code used for generated degraded-mode trades.
pub const SYNTHETIC_MARKET: &str = "SYNTHETIC";

/// Codec for the Upbit trade feed (DEFAULT format).
#[derive(Debug, Default, Clone)]
pub struct TradeCodec;

impl TradeCodec {
    /// Create a new trade codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FeedCodec for TradeCodec {
    type Item = TradeRecord;

    fn feed_type(&self) -> &'static str {
        "trade"
    }

    fn decode(&self, record: &RawRecord) -> Result<Option<TradeRecord>, CodecError> {
        match record.get("type").and_then(|v| v.as_str()) {
            Some("trade") => {
                let value = serde_json::Value::Object(record.clone());
                let msg: TradeMessage = serde_json::from_value(value)?;
                Ok(Some(msg.into()))
            }
            // Other record types on this socket (e.g. snapshots of feeds we
            // did not subscribe to) are skipped, not errors.
            Some(_) => Ok(None),
            None => {
                // Heartbeat replies come back as {"status":"UP"}.
                if record.contains_key("status") {
                    Ok(None)
                } else {
                    Err(CodecError::MissingField("type"))
                }
            }
        }
    }

    fn encode_subscribe(&self, symbols: &[Symbol]) -> Result<String, CodecError> {
        let epoch_ms = chrono::Utc::now().timestamp_millis();
        let frame = SubscribeFrame::new(self.feed_type(), symbols, epoch_ms);
        Ok(frame.to_json()?)
    }

    fn synthetic(&self, seq: u64) -> Option<TradeRecord> {
        // A slow triangle wave around a fixed base price, so downstream
        // charts keep moving while the upstream is down.
        let phase = seq % 20;
        let step = if phase < 10 { phase } else { 20 - phase };
        let price = Decimal::new(100_000, 0) + Decimal::new(i64::try_from(step).ok()?, 0);

        Some(TradeRecord {
            market: SYNTHETIC_MARKET.to_string(),
            price,
            volume: Decimal::ONE,
            side: if seq % 2 == 0 { Side::Bid } else { Side::Ask },
            sequence_id: seq,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }
}
