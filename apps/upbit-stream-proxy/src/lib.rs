#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Upbit Stream Proxy - Market Data Multiplexer
//!
//! Maintains a single managed WebSocket connection to an Upbit-style
//! exchange feed and multiplexes decoded trades to many independent
//! in-process consumers, surviving dropped sockets, stalled servers, and
//! bursty consumer churn with bounded memory.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Trade records, subscription requests, connection status
//! - **Application**: Port definitions (codec, trade store) and the
//!   dedup + bounded cache ingest service
//! - **Infrastructure**: The Upbit WebSocket client stack, the
//!   reference-counted fan-out, the in-memory store, and the config,
//!   metrics, and telemetry plumbing
//!
//! # Data Flow
//!
//! ```text
//! Upbit WS ──► FeedClient ──► BroadcastSource ──► IngestService ──► consumers
//!              (reconnect,     (ref-counted        (dedup +
//!               heartbeat,      fan-out, grace      bounded cache)
//!               rate limit)     period)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed types with no transport dependencies.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and operational plumbing.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::status::ConnectionStatus;
pub use domain::subscription::{SubscriptionError, SubscriptionRequest, Symbol};
pub use domain::trade::{Side, TradeKey, TradeRecord};

// Ports
pub use application::ports::{CodecError, FeedCodec, RawRecord, StoreError, TradeStore};

// Ingest service
pub use application::services::ingest::{DedupGate, IngestConfig, IngestService};

// Feed client stack
pub use infrastructure::upbit::{
    BackoffConfig, BackoffPolicy, FeedClient, FeedClientConfig, HeartbeatConfig, PacedReceiver,
    RateLimiter, TradeCodec,
};

// Fan-out
pub use infrastructure::broadcast::{
    BroadcastSource, BroadcastSourceConfig, FeedHandle, SourceMode,
};

// Store adapter
pub use infrastructure::store::MemoryTradeStore;

// Configuration
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, IngestSettings, ProxyConfig, ServerSettings,
    WebSocketSettings,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{init as init_telemetry, try_init as try_init_telemetry};
