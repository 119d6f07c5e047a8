//! Subscription Requests
//!
//! An ordered, capped list of market symbols. Two requests naming the same
//! set of symbols in a different order are considered equal so that
//! re-subscription with a shuffled list never tears down a live connection.

use std::collections::HashSet;

/// A market symbol string (e.g. `KRW-BTC`).
pub type Symbol = String;

/// Error constructing a subscription request.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The symbol list was empty.
    #[error("subscription request needs at least one symbol")]
    Empty,
}

/// An ordered symbol list, truncated to the configured maximum.
///
/// Duplicates are dropped (first occurrence wins) and anything past the cap
/// is discarded with a warning, per the subscribe-frame contract: order is
/// preserved and only the first `max` entries reach the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    symbols: Vec<Symbol>,
}

impl SubscriptionRequest {
    /// Build a request from an ordered symbol list.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Empty`] if no symbols are given.
    pub fn new<I, S>(symbols: I, max: usize) -> Result<Self, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let mut seen = HashSet::new();
        let mut deduped: Vec<Symbol> = Vec::new();
        let mut dropped = 0usize;

        for symbol in symbols {
            let symbol = symbol.into();
            if seen.insert(symbol.clone()) {
                if deduped.len() < max {
                    deduped.push(symbol);
                } else {
                    dropped += 1;
                }
            }
        }

        if deduped.is_empty() {
            return Err(SubscriptionError::Empty);
        }

        if dropped > 0 {
            tracing::warn!(
                kept = deduped.len(),
                dropped,
                "subscription list over limit, truncated"
            );
        }

        Ok(Self { symbols: deduped })
    }

    /// The symbols in subscription order.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Number of symbols in the request.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the request is empty (never true for constructed requests).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Order-independent equality.
    ///
    /// Set-equal requests must not trigger reconnection, so callers compare
    /// with this rather than `==`.
    #[must_use]
    pub fn is_set_equal(&self, other: &Self) -> bool {
        if self.symbols.len() != other.symbols.len() {
            return false;
        }
        let mine: HashSet<&str> = self.symbols.iter().map(String::as_str).collect();
        other.symbols.iter().all(|s| mine.contains(s.as_str()))
    }
}
