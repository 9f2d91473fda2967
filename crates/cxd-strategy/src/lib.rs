//! Strategy interface and registry.
//!
//! Strategies are **pure, deterministic functions over OHLCV frames** —
//! three populate passes writing indicator and signal columns. The same
//! interface drives both the live scanner and the backtester; strategies
//! never see a venue, a clock, or a store.

pub mod frame;
pub mod registry;
pub mod strategies;

pub use frame::{Bar, Frame, ENTER_LONG, ENTER_SHORT, EXIT_LONG, EXIT_SHORT};
pub use registry::StrategyRegistry;
pub use strategies::SmaCross;

use serde_json::Value;

/// Per-invocation context: the instrument being evaluated plus the
/// strategy's configured parameters.
#[derive(Clone, Debug)]
pub struct StrategyMeta {
    pub pair: String,
    pub parameters: Value,
}

impl StrategyMeta {
    pub fn for_pair(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            parameters: Value::Null,
        }
    }
}

/// The strategy contract consumed by backtester and scanner.
///
/// Implementations MUST be deterministic functions of the frame: no IO, no
/// wall-clock, no randomness. Entry signals go into the `enter_long` /
/// `enter_short` columns, exits into `exit_long` / `exit_short`; a value of
/// 1.0 means "signal on this bar".
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn populate_indicators(&self, frame: Frame, meta: &StrategyMeta) -> Frame;

    fn populate_entry_trend(&self, frame: Frame, meta: &StrategyMeta) -> Frame;

    fn populate_exit_trend(&self, frame: Frame, meta: &StrategyMeta) -> Frame;

    /// Convenience: run all three passes in order.
    fn populate_all(&self, frame: Frame, meta: &StrategyMeta) -> Frame {
        let frame = self.populate_indicators(frame, meta);
        let frame = self.populate_entry_trend(frame, meta);
        self.populate_exit_trend(frame, meta)
    }
}
