//! Configuration Module
//!
//! Configuration loading for the proxy service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, IngestSettings, ProxyConfig, ServerSettings,
    WebSocketSettings,
};
