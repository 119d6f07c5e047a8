//! Proxy Configuration Settings
//!
//! Configuration types for the stream proxy, loaded from environment
//! variables with sensible defaults; only structurally invalid combinations
//! are rejected.

use std::time::Duration;

use crate::application::services::ingest::IngestConfig;
use crate::infrastructure::broadcast::BroadcastSourceConfig;
use crate::infrastructure::upbit::backoff::BackoffConfig;
use crate::infrastructure::upbit::client::FeedClientConfig;
use crate::infrastructure::upbit::heartbeat::HeartbeatConfig;

/// Default feed endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://api.upbit.com/websocket/v1";

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Feed endpoint URL.
    pub endpoint: String,
    /// Maximum symbols per subscription; longer lists are truncated.
    pub max_subscription_count: usize,
    /// Heartbeat ping interval.
    pub ping_interval: Duration,
    /// Inbound silence tolerated after a ping.
    pub pong_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to reconnect delays.
    pub reconnect_jitter: f64,
    /// Retries per dormancy cycle.
    pub max_retries: u32,
    /// Minimum spacing between outbound control frames.
    pub send_min_interval: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_subscription_count: 30,
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            max_retries: 5,
            send_min_interval: Duration::from_millis(500),
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Shared stream channel capacity.
    pub capacity: usize,
    /// How long the upstream survives after the last subscriber leaves.
    pub grace_period: Duration,
    /// Switch to a synthetic sequence when the upstream gives up.
    pub synthetic_fallback: bool,
    /// Spacing of generated records in synthetic mode.
    pub synthetic_interval: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            grace_period: Duration::from_secs(5),
            synthetic_fallback: false,
            synthetic_interval: Duration::from_secs(1),
        }
    }
}

/// Dedup and rolling cache settings.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Dedup seen-set capacity.
    pub dedup_capacity: usize,
    /// Store size restored after an eviction batch.
    pub cache_target: usize,
    /// Store size that triggers an eviction batch.
    pub cache_high_water: usize,
    /// Forwarded-stream channel capacity.
    pub forward_capacity: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            dedup_capacity: 1000,
            cache_target: 1000,
            cache_high_water: 1200,
            forward_capacity: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9100 }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Markets subscribed by the composition root.
    pub markets: Vec<String>,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Dedup and cache settings.
    pub ingest: IngestSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            markets: vec!["KRW-BTC".to_string()],
            websocket: WebSocketSettings::default(),
            broadcast: BroadcastSettings::default(),
            ingest: IngestSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when the market list is empty or the cache
    /// thresholds are inverted.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let markets = std::env::var("UPBIT_PROXY_MARKETS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or(defaults.markets);

        let websocket = WebSocketSettings {
            endpoint: std::env::var("UPBIT_PROXY_ENDPOINT")
                .unwrap_or(defaults.websocket.endpoint),
            max_subscription_count: parse_env_usize(
                "UPBIT_PROXY_MAX_SUBSCRIPTIONS",
                defaults.websocket.max_subscription_count,
            ),
            ping_interval: parse_env_duration_secs(
                "UPBIT_PROXY_PING_INTERVAL_SECS",
                defaults.websocket.ping_interval,
            ),
            pong_timeout: parse_env_duration_secs(
                "UPBIT_PROXY_PONG_TIMEOUT_SECS",
                defaults.websocket.pong_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "UPBIT_PROXY_RECONNECT_DELAY_INITIAL_MS",
                defaults.websocket.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "UPBIT_PROXY_RECONNECT_DELAY_MAX_SECS",
                defaults.websocket.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "UPBIT_PROXY_RECONNECT_DELAY_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_env_f64(
                "UPBIT_PROXY_RECONNECT_JITTER",
                defaults.websocket.reconnect_jitter,
            ),
            max_retries: parse_env_u32(
                "UPBIT_PROXY_MAX_RETRIES",
                defaults.websocket.max_retries,
            ),
            send_min_interval: parse_env_duration_millis(
                "UPBIT_PROXY_SEND_MIN_INTERVAL_MS",
                defaults.websocket.send_min_interval,
            ),
        };

        let broadcast = BroadcastSettings {
            capacity: parse_env_usize(
                "UPBIT_PROXY_BROADCAST_CAPACITY",
                defaults.broadcast.capacity,
            ),
            grace_period: parse_env_duration_millis(
                "UPBIT_PROXY_GRACE_PERIOD_MS",
                defaults.broadcast.grace_period,
            ),
            synthetic_fallback: parse_env_bool(
                "UPBIT_PROXY_SYNTHETIC_FALLBACK",
                defaults.broadcast.synthetic_fallback,
            ),
            synthetic_interval: parse_env_duration_millis(
                "UPBIT_PROXY_SYNTHETIC_INTERVAL_MS",
                defaults.broadcast.synthetic_interval,
            ),
        };

        let ingest = IngestSettings {
            dedup_capacity: parse_env_usize(
                "UPBIT_PROXY_DEDUP_CAPACITY",
                defaults.ingest.dedup_capacity,
            ),
            cache_target: parse_env_usize(
                "UPBIT_PROXY_CACHE_TARGET",
                defaults.ingest.cache_target,
            ),
            cache_high_water: parse_env_usize(
                "UPBIT_PROXY_CACHE_HIGH_WATER",
                defaults.ingest.cache_high_water,
            ),
            forward_capacity: parse_env_usize(
                "UPBIT_PROXY_FORWARD_CAPACITY",
                defaults.ingest.forward_capacity,
            ),
        };

        let server = ServerSettings {
            metrics_port: parse_env_u16(
                "UPBIT_PROXY_METRICS_PORT",
                defaults.server.metrics_port,
            ),
        };

        let config = Self {
            markets,
            websocket,
            broadcast,
            ingest,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.markets.is_empty() {
            return Err(ConfigError::EmptyValue("UPBIT_PROXY_MARKETS".to_string()));
        }
        if self.ingest.cache_high_water <= self.ingest.cache_target {
            return Err(ConfigError::Invalid(
                "cache high-water mark must exceed the cache target".to_string(),
            ));
        }
        if self.websocket.max_subscription_count == 0 {
            return Err(ConfigError::Invalid(
                "max subscription count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Client configuration derived from these settings.
    #[must_use]
    pub fn client_config(&self) -> FeedClientConfig {
        FeedClientConfig {
            url: self.websocket.endpoint.clone(),
            max_subscription_count: self.websocket.max_subscription_count,
            heartbeat: HeartbeatConfig::new(
                self.websocket.ping_interval,
                self.websocket.pong_timeout,
            ),
            backoff: BackoffConfig {
                initial_delay: self.websocket.reconnect_delay_initial,
                max_delay: self.websocket.reconnect_delay_max,
                multiplier: self.websocket.reconnect_delay_multiplier,
                jitter_factor: self.websocket.reconnect_jitter,
            },
            max_retries: self.websocket.max_retries,
            min_send_interval: self.websocket.send_min_interval,
            events_capacity: self.broadcast.capacity,
            status_capacity: 64,
        }
    }

    /// Fan-out configuration derived from these settings.
    #[must_use]
    pub fn source_config(&self) -> BroadcastSourceConfig {
        BroadcastSourceConfig {
            grace_period: self.broadcast.grace_period,
            capacity: self.broadcast.capacity,
            synthetic_fallback: self.broadcast.synthetic_fallback,
            synthetic_interval: self.broadcast.synthetic_interval,
        }
    }

    /// Ingest configuration derived from these settings.
    #[must_use]
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            dedup_capacity: self.ingest.dedup_capacity,
            cache_target: self.ingest.cache_target,
            cache_high_water: self.ingest.cache_high_water,
            forward_capacity: self.ingest.forward_capacity,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting resolved to an empty value.
    #[error("configuration value {0} cannot be empty")]
    EmptyValue(String),
    /// Settings contradict each other.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
