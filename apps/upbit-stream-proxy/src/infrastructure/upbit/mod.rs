//! Upbit WebSocket Adapter
//!
//! The client stack for the Upbit-style feed protocol:
//!
//! - **messages/codec**: wire types and JSON normalization
//! - **rate_limit**: FIFO pacing for outbound control frames
//! - **backoff**: adaptive reconnect delays
//! - **heartbeat**: ping scheduling and pong-timeout detection
//! - **session**: one physical connection
//! - **client**: the reconnect supervisor collaborators talk to

pub mod backoff;
pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod rate_limit;
pub(crate) mod session;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use client::{FeedClient, FeedClientConfig};
pub use codec::{SYNTHETIC_MARKET, TradeCodec, normalize};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
pub use messages::{SubscribeFrame, TradeMessage, ping_frame};
pub use rate_limit::{PacedReceiver, RateLimiter};
