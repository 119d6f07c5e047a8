//! Tracing Integration
//!
//! Structured logging setup for the proxy. Uses the `RUST_LOG` env filter
//! with per-crate defaults that keep transport internals quiet.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the tracing subscriber.
///
/// Respects `RUST_LOG`; defaults the crate itself to `info` and the
/// WebSocket stack to `warn`.
#[allow(clippy::expect_used)]
pub fn init() {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "upbit_stream_proxy=info"
                .parse()
                .expect("static directive 'upbit_stream_proxy=info' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        )
        .add_directive(
            "tokio_tungstenite=warn"
                .parse()
                .expect("static directive 'tokio_tungstenite=warn' is valid"),
        );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize tracing, tolerating an already-installed subscriber.
///
/// For tests that want log output without fighting over the global
/// subscriber.
pub fn try_init() {
    let env_filter = EnvFilter::from_default_env();
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
