//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via the Prometheus exporter's own HTTP
//! listener.
//!
//! # Metrics Categories
//!
//! - **Messages**: decoded, dropped, duplicate, and synthetic counts
//! - **Connection**: reconnect attempts
//! - **Fan-out**: attached subscriber gauge
//! - **Cache**: eviction batch sizes

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

static METRICS_INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder and its HTTP listener on `port`.
///
/// Idempotent: later calls are no-ops. Must run inside a tokio runtime.
///
/// # Errors
///
/// Returns a [`BuildError`] if the exporter cannot be installed.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if METRICS_INSTALLED.get().is_some() {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    let _ = METRICS_INSTALLED.set(());

    register_metrics();
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "upbit_proxy_messages_received_total",
        "Decoded records delivered by the feed client"
    );
    describe_counter!(
        "upbit_proxy_decode_failures_total",
        "Inbound payloads or records dropped as undecodable"
    );
    describe_counter!(
        "upbit_proxy_duplicates_dropped_total",
        "Trades dropped by the dedup gate"
    );
    describe_counter!(
        "upbit_proxy_messages_dropped_total",
        "Records lost to lagging consumers"
    );
    describe_counter!(
        "upbit_proxy_reconnects_total",
        "Upstream reconnection attempts scheduled"
    );
    describe_counter!(
        "upbit_proxy_synthetic_messages_total",
        "Records generated while in degraded synthetic mode"
    );
    describe_counter!(
        "upbit_proxy_cache_evictions_total",
        "Trades removed by cache eviction batches"
    );
    describe_gauge!(
        "upbit_proxy_fanout_subscribers",
        "Currently attached fan-out subscribers"
    );
}

/// Record one decoded record delivered by the client.
pub fn record_message_received() {
    counter!("upbit_proxy_messages_received_total").increment(1);
}

/// Record a payload or record dropped as undecodable.
pub fn record_decode_failure() {
    counter!("upbit_proxy_decode_failures_total").increment(1);
}

/// Record a trade dropped by the dedup gate.
pub fn record_duplicate_dropped() {
    counter!("upbit_proxy_duplicates_dropped_total").increment(1);
}

/// Record records lost to a lagging consumer.
pub fn record_messages_dropped(count: u64) {
    counter!("upbit_proxy_messages_dropped_total").increment(count);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("upbit_proxy_reconnects_total").increment(1);
}

/// Record one generated synthetic record.
pub fn record_synthetic_message() {
    counter!("upbit_proxy_synthetic_messages_total").increment(1);
}

/// Record the size of a cache eviction batch.
pub fn record_cache_eviction(removed: u64) {
    counter!("upbit_proxy_cache_evictions_total").increment(removed);
}

/// Update the fan-out subscriber gauge.
pub fn set_fanout_subscribers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("upbit_proxy_fanout_subscribers").set(count as f64);
}
