//! Upbit Stream Proxy Binary
//!
//! Starts the market data pipeline: one managed feed connection, the
//! reference-counted fan-out, and the dedup + bounded cache.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p upbit-stream-proxy
//! ```
//!
//! # Environment Variables (all optional)
//!
//! - `UPBIT_PROXY_MARKETS`: Comma-separated market codes (default: KRW-BTC)
//! - `UPBIT_PROXY_ENDPOINT`: Feed URL (default: wss://api.upbit.com/websocket/v1)
//! - `UPBIT_PROXY_MAX_SUBSCRIPTIONS`: Symbol cap per subscription (default: 30)
//! - `UPBIT_PROXY_PING_INTERVAL_SECS` / `UPBIT_PROXY_PONG_TIMEOUT_SECS`
//! - `UPBIT_PROXY_RECONNECT_DELAY_INITIAL_MS` / `UPBIT_PROXY_RECONNECT_DELAY_MAX_SECS`
//! - `UPBIT_PROXY_MAX_RETRIES`: Retries per dormancy cycle (default: 5)
//! - `UPBIT_PROXY_SEND_MIN_INTERVAL_MS`: Outbound pacing (default: 500)
//! - `UPBIT_PROXY_GRACE_PERIOD_MS`: Fan-out teardown grace (default: 5000)
//! - `UPBIT_PROXY_SYNTHETIC_FALLBACK`: Degraded-mode generator (default: false)
//! - `UPBIT_PROXY_CACHE_TARGET` / `UPBIT_PROXY_CACHE_HIGH_WATER`
//! - `UPBIT_PROXY_METRICS_PORT`: Prometheus listener (default: 9100)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use upbit_stream_proxy::infrastructure::telemetry;
use upbit_stream_proxy::{
    BroadcastSource, ConnectionStatus, FeedClient, IngestService, MemoryTradeStore, ProxyConfig,
    SourceMode, TradeCodec, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();
    telemetry::init();

    tracing::info!("starting Upbit stream proxy");

    let config = ProxyConfig::from_env()?;
    log_config(&config);

    if config.server.metrics_port != 0
        && let Err(e) = init_metrics(config.server.metrics_port)
    {
        tracing::warn!(error = %e, "metrics exporter failed to start, continuing without it");
    }

    let shutdown_token = CancellationToken::new();

    // One client per logical feed type, owned by the fan-out source.
    let client = FeedClient::new(config.client_config(), TradeCodec::new());
    let source = BroadcastSource::new(client, config.source_config());

    let store = Arc::new(MemoryTradeStore::new());
    let ingest = Arc::new(IngestService::new(store, config.ingest_config()));

    // Log status transitions; this is the sole failure-observation channel.
    let status_rx = source.status();
    tokio::spawn(log_status_transitions(status_rx));

    let mode_rx = source.mode();
    tokio::spawn(log_mode_transitions(mode_rx));

    // First watch() starts the upstream connection.
    let handle = source.watch(config.markets.clone())?;
    let ingest_task = tokio::spawn(Arc::clone(&ingest).run(handle, shutdown_token.clone()));

    tracing::info!(markets = ?config.markets, "stream proxy ready");

    await_shutdown(&shutdown_token).await;

    source.dispose();
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, ingest_task).await;

    tracing::info!("stream proxy stopped");
    Ok(())
}

/// Log every connection status transition.
async fn log_status_transitions(
    mut rx: tokio::sync::broadcast::Receiver<ConnectionStatus>,
) {
    loop {
        match rx.recv().await {
            Ok(ConnectionStatus::Connected) => tracing::info!("feed connected"),
            Ok(ConnectionStatus::MaxRetryExceeded) => {
                tracing::warn!("feed gave up reconnecting; waiting for an external trigger");
            }
            Ok(status) => tracing::info!(status = %status, "feed status changed"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Log live/synthetic/idle transitions of the shared stream.
async fn log_mode_transitions(mut rx: tokio::sync::watch::Receiver<SourceMode>) {
    loop {
        let mode = *rx.borrow_and_update();
        match mode {
            SourceMode::Synthetic => {
                tracing::warn!("shared stream degraded to the synthetic sequence");
            }
            SourceMode::Live => tracing::info!("shared stream is live"),
            SourceMode::Idle => tracing::debug!("shared stream is idle"),
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        endpoint = %config.websocket.endpoint,
        markets = config.markets.len(),
        max_subscriptions = config.websocket.max_subscription_count,
        max_retries = config.websocket.max_retries,
        metrics_port = config.server.metrics_port,
        synthetic_fallback = config.broadcast.synthetic_fallback,
        "configuration loaded"
    );
}

/// Load .env from the current directory or any ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    shutdown_token.cancel();
}
