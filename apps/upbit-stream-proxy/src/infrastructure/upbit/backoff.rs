//! Backoff Policy
//!
//! Computes adaptive reconnect delays from an injected retry counter:
//! exponential growth clamped to `[initial, max]`, with proportional jitter
//! so a fleet of clients does not reconnect in lockstep. The rolling
//! success/failure signal is tracked separately so callers can drive the
//! counter themselves in tests.

use std::time::Duration;

use rand::Rng;

/// Configuration for backoff behavior.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay for the first reconnection attempt, and the lower clamp bound.
    pub initial_delay: Duration,
    /// Upper clamp bound for reconnection delays.
    pub max_delay: Duration,
    /// Growth factor per retry (e.g. 2.0 doubles the delay each attempt).
    pub multiplier: f64,
    /// Jitter as a fraction of the computed delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Reconnect delay calculator with a rolling health signal.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    consecutive_failures: u32,
}

impl BackoffPolicy {
    /// Create a policy from configuration.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    /// Record a successful connection; resets the failure signal.
    pub const fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failed connection attempt.
    pub const fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the last recorded outcome was a success.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }

    /// Delay for the next attempt driven by the internal failure signal.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        self.calculate_backoff(
            self.consecutive_failures,
            self.config.initial_delay,
            self.config.max_delay,
        )
    }

    /// Compute the delay for `retry_count` (1-based), clamped to
    /// `[initial, max]`.
    ///
    /// Pure in `retry_count` so tests can probe any attempt number without
    /// accumulating real failures. Jitter is applied before the clamp, so
    /// the bounds hold for every jitter factor.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate_backoff(
        &self,
        retry_count: u32,
        initial: Duration,
        max: Duration,
    ) -> Duration {
        let initial_ms = initial.as_millis() as f64;
        let max_ms = max.as_millis() as f64;

        let exponent = retry_count.saturating_sub(1).min(63);
        let base_ms = initial_ms * self.config.multiplier.powi(i32::try_from(exponent).unwrap_or(63));
        let base_ms = if base_ms.is_finite() { base_ms } else { max_ms };

        let jittered_ms = self.apply_jitter(base_ms);
        let clamped_ms = jittered_ms.clamp(initial_ms, max_ms);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(clamped_ms.round() as u64)
    }

    fn apply_jitter(&self, base_ms: f64) -> f64 {
        if self.config.jitter_factor <= 0.0 {
            return base_ms;
        }

        let jitter_range = base_ms * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        base_ms + jitter
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
