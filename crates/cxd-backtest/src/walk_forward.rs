//! Walk-forward analysis: sliding `(train + test)` windows with a fixed
//! stride, each dispatched to the backtester with window-local dates and a
//! zero validation split. Aggregate metrics run over the concatenated
//! window equity curves and trades.

use serde::{Deserialize, Serialize};
use tracing::info;

use cxd_domain::PerformanceMetrics;
use cxd_metrics::MetricsCalculator;
use cxd_strategy::{Frame, Strategy};

use crate::engine::Backtester;
use crate::types::{BacktestConfig, BacktestError, BacktestResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Training window length, bars.
    pub train_window: usize,
    /// Out-of-sample test window length, bars.
    pub test_window: usize,
    /// Stride between window starts, bars.
    pub step_size: usize,
    pub initial_capital: f64,
    pub timeframe: String,
    pub slippage_bps: f64,
    pub commission_bps: f64,
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.train_window == 0 || self.test_window == 0 || self.step_size == 0 {
            return Err(BacktestError::InvalidConfig(
                "walk-forward windows and step must be positive".to_string(),
            ));
        }
        if self.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidConfig(
                "initial capital must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub window_results: Vec<BacktestResult>,
    pub aggregate_metrics: Option<PerformanceMetrics>,
    pub total_windows: usize,
}

pub struct WalkForwardEngine {
    config: WalkForwardConfig,
    metrics: MetricsCalculator,
}

impl WalkForwardEngine {
    pub fn new(config: WalkForwardConfig) -> Self {
        Self {
            config,
            metrics: MetricsCalculator::default(),
        }
    }

    pub fn run(
        &self,
        strategy: &dyn Strategy,
        data: &Frame,
        base_config: &BacktestConfig,
    ) -> Result<WalkForwardResult, BacktestError> {
        self.config.validate()?;

        let mut window_results = Vec::new();
        let mut all_equity = Vec::new();
        let mut all_trades = Vec::new();

        for (start, end) in self.window_indices(data.len()) {
            let window = data.slice(start, end);
            if window.is_empty() {
                continue;
            }

            let window_total = self.config.train_window + self.config.test_window;
            let train_ratio = self.config.train_window as f64 / window_total as f64;

            let window_config = BacktestConfig {
                strategy_name: base_config.strategy_name.clone(),
                instruments: base_config.instruments.clone(),
                start_date: window.bars().first().expect("non-empty window").date,
                end_date: window.bars().last().expect("non-empty window").date,
                initial_capital: self.config.initial_capital,
                timeframe: self.config.timeframe.clone(),
                slippage_bps: self.config.slippage_bps,
                commission_bps: self.config.commission_bps,
                train_ratio,
                validate_ratio: 0.0,
                test_ratio: 1.0 - train_ratio,
                max_position_pct: base_config.max_position_pct,
            };

            let result = Backtester::new(window_config).run_backtest(strategy, &window)?;
            all_equity.extend(result.equity_curve.iter().cloned());
            all_trades.extend(result.trades.iter().cloned());
            window_results.push(result);
        }

        let aggregate_metrics = if all_equity.is_empty() {
            None
        } else {
            Some(self.metrics.calculate_all(
                &all_equity,
                &all_trades,
                self.config.initial_capital,
            ))
        };

        info!(windows = window_results.len(), "walk_forward_complete");
        Ok(WalkForwardResult {
            total_windows: window_results.len(),
            window_results,
            aggregate_metrics,
        })
    }

    fn window_indices(&self, total_rows: usize) -> Vec<(usize, usize)> {
        let window = self.config.train_window + self.config.test_window;
        if total_rows < window {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut start = 0;
        while start + window <= total_rows {
            out.push((start, start + window));
            start += self.config.step_size;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use chrono::Utc;
    use cxd_testkit::{synthetic_ohlcv, MockStrategy};

    fn wf_config() -> WalkForwardConfig {
        WalkForwardConfig {
            train_window: 60,
            test_window: 30,
            step_size: 30,
            initial_capital: 100_000.0,
            timeframe: "1h".to_string(),
            slippage_bps: 5.0,
            commission_bps: 10.0,
        }
    }

    fn base_config() -> BacktestConfig {
        BacktestConfig::new(
            "mock",
            vec!["BTC-USD".to_string()],
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            DateTime::<Utc>::from_timestamp(1_705_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn window_count_matches_stride_arithmetic() {
        let engine = WalkForwardEngine::new(wf_config());
        // 300 rows, window 90, step 30 -> starts at 0,30,...,210 = 8 windows.
        assert_eq!(engine.window_indices(300).len(), 8);
        // Shorter than one window -> none.
        assert!(engine.window_indices(80).is_empty());
    }

    #[test]
    fn run_produces_window_and_aggregate_metrics() {
        let engine = WalkForwardEngine::new(wf_config());
        let data = synthetic_ohlcv(42, 300);
        let strategy = MockStrategy::new(10, 5);

        let result = engine.run(&strategy, &data, &base_config()).unwrap();
        assert_eq!(result.total_windows, 8);
        assert!(result.aggregate_metrics.is_some());
        assert!(result.aggregate_metrics.as_ref().unwrap().all_finite());
        for window in &result.window_results {
            // Every window starts from a fresh capital base.
            let first = window.equity_curve.first().unwrap();
            assert!((first.equity - 100_000.0).abs() < 1_000.0);
        }
    }

    #[test]
    fn zero_step_is_rejected() {
        let mut config = wf_config();
        config.step_size = 0;
        let engine = WalkForwardEngine::new(config);
        let data = synthetic_ohlcv(42, 300);
        assert!(engine
            .run(&MockStrategy::new(10, 5), &data, &base_config())
            .is_err());
    }
}
