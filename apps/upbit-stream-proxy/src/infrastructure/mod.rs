//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application-layer ports plus the
//! operational plumbing (config, metrics, logging).

/// Reference-counted fan-out above the feed client.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-memory trade store adapter.
pub mod store;

/// Tracing integration.
pub mod telemetry;

/// Upbit WebSocket client stack (codec, heartbeat, backoff, session,
/// reconnecting client).
pub mod upbit;
