//! Deterministic backtest and walk-forward engine.
//!
//! Replays OHLCV through the strategy interface with train/validate/test
//! splits, slippage and commission modelling, and per-split plus overall
//! metrics. CPU-bound and fully synchronous: live callers dispatch runs via
//! `spawn_blocking`.

pub mod engine;
pub mod loader;
pub mod types;
pub mod walk_forward;

pub use engine::Backtester;
pub use loader::load_ohlcv_csv;
pub use types::{BacktestConfig, BacktestError, BacktestResult, SplitOutcome};
pub use walk_forward::{WalkForwardConfig, WalkForwardEngine, WalkForwardResult};
