//! Port Interfaces
//!
//! Interfaces the pipeline core depends on, following the Hexagonal
//! Architecture pattern used across this workspace.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`TradeStore`]: rolling persistence for admitted trades
//!
//! ## Capability Ports (Injected)
//!
//! - [`FeedCodec`]: per-feed-type decode/encode, supplied at construction
//!   so the reconnecting client stays generic over the message shape.

use crate::domain::subscription::Symbol;
use crate::domain::trade::TradeRecord;

/// One inbound record, normalized to a string-keyed JSON map regardless of
/// whether the exchange sent a single object or an array.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload was neither a JSON object nor an array of objects.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// A record was missing a field the decoder requires.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Decode/encode capability for one feed type.
///
/// Implemented once per feed type and injected at construction. The client
/// never interprets payloads itself; it normalizes frames to [`RawRecord`]s
/// and hands each one to the codec.
pub trait FeedCodec: Send + Sync + 'static {
    /// Decoded message type delivered to subscribers.
    type Item: Clone + Send + 'static;

    /// Feed type tag, used in the subscribe ticket (e.g. `trade`).
    fn feed_type(&self) -> &'static str;

    /// Decode one normalized record.
    ///
    /// `Ok(None)` means the record is a recognized control frame (e.g. a
    /// heartbeat reply) and should be skipped silently; `Err` means the
    /// record is malformed and will be logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for malformed records.
    fn decode(&self, record: &RawRecord) -> Result<Option<Self::Item>, CodecError>;

    /// Encode the subscribe frame for the given symbol list.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if serialization fails.
    fn encode_subscribe(&self, symbols: &[Symbol]) -> Result<String, CodecError>;

    /// Produce the `seq`-th element of the synthetic degraded-mode sequence.
    ///
    /// Feed types that do not define a synthetic shape return `None`, which
    /// disables the fallback regardless of configuration.
    fn synthetic(&self, seq: u64) -> Option<Self::Item> {
        let _ = seq;
        None
    }
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend rejected the operation.
    #[error("trade store backend error: {0}")]
    Backend(String),
}

/// Rolling persistence for admitted trades.
///
/// The pipeline only relies on insert-count-evict semantics; the concrete
/// storage format is a collaborator concern behind this port.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TradeStore: Send + Sync {
    /// Append one trade to the rolling window.
    async fn insert(&self, trade: &TradeRecord) -> Result<(), StoreError>;

    /// Number of trades currently stored.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Delete the `n` oldest trades in one batch; returns how many were
    /// actually removed.
    async fn evict_oldest(&self, n: usize) -> Result<usize, StoreError>;

    /// The most recent trades, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError>;
}
