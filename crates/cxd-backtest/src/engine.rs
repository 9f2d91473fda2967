//! The bar-loop backtester.
//!
//! Per split: reset state to the initial capital, run the strategy's three
//! populate passes over the split's frame, then iterate bars using bar
//! `i-1`'s signals to act at bar `i`'s close. Exits process before entries.
//! Slippage is applied adversely on both sides; commission is split half on
//! entry, half on exit. Remaining positions close on the last bar.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use cxd_domain::{EquityPoint, TradeRecord, TradeSide};
use cxd_metrics::MetricsCalculator;
use cxd_strategy::{Frame, Strategy, StrategyMeta, ENTER_LONG, ENTER_SHORT, EXIT_LONG, EXIT_SHORT};

use crate::types::{BacktestConfig, BacktestError, BacktestResult, SplitOutcome};

/// An open backtest position.
#[derive(Clone, Debug)]
struct OpenPosition {
    side: TradeSide,
    size: f64,
    entry_price: f64,
    entry_time: DateTime<Utc>,
    entry_fees: f64,
}

/// Per-split mutable state.
struct SplitState {
    cash: f64,
    positions: BTreeMap<String, OpenPosition>,
    equity_curve: Vec<EquityPoint>,
    trades: Vec<TradeRecord>,
    equity_peak: f64,
}

impl SplitState {
    fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            positions: BTreeMap::new(),
            equity_curve: Vec::new(),
            trades: Vec::new(),
            equity_peak: initial_capital,
        }
    }
}

/// The backtest engine.
pub struct Backtester {
    config: BacktestConfig,
    metrics: MetricsCalculator,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            metrics: MetricsCalculator::default(),
        }
    }

    /// Run the full backtest with train/validate/test splits.
    pub fn run_backtest(
        &self,
        strategy: &dyn Strategy,
        data: &Frame,
    ) -> Result<BacktestResult, BacktestError> {
        let started = Instant::now();
        self.config.validate()?;
        if data.is_empty() {
            return Err(BacktestError::EmptyData);
        }

        let (train, validate, test) = self.split(data);
        let train_outcome = self.run_split(strategy, &train, "train");
        let validate_outcome = self.run_split(strategy, &validate, "validate");
        let test_outcome = self.run_split(strategy, &test, "test");

        let mut equity_curve = Vec::new();
        equity_curve.extend(train_outcome.equity.iter().cloned());
        equity_curve.extend(validate_outcome.equity.iter().cloned());
        equity_curve.extend(test_outcome.equity.iter().cloned());

        let mut trades = Vec::new();
        trades.extend(train_outcome.trades.iter().cloned());
        trades.extend(validate_outcome.trades.iter().cloned());
        trades.extend(test_outcome.trades.iter().cloned());

        let metrics =
            self.metrics
                .calculate_all(&equity_curve, &trades, self.config.initial_capital);
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.config.initial_capital);

        info!(
            strategy = %self.config.strategy_name,
            trades = trades.len(),
            final_equity,
            "backtest_complete"
        );

        Ok(BacktestResult {
            id: Uuid::new_v4(),
            strategy_name: self.config.strategy_name.clone(),
            instruments: self.config.instruments.clone(),
            timeframe: self.config.timeframe.clone(),
            start_date: self.config.start_date,
            end_date: self.config.end_date,
            initial_capital: self.config.initial_capital,
            final_equity,
            equity_curve,
            trades,
            metrics,
            in_sample_metrics: train_outcome.metrics,
            validation_metrics: validate_outcome.metrics,
            out_sample_metrics: test_outcome.metrics,
            execution_time_seconds: started.elapsed().as_secs_f64(),
            created_at: Utc::now(),
        })
    }

    /// Row-fraction split into train/validate/test.
    fn split(&self, data: &Frame) -> (Frame, Frame, Frame) {
        let n = data.len();
        let train_end = (n as f64 * self.config.train_ratio) as usize;
        let validate_end =
            (n as f64 * (self.config.train_ratio + self.config.validate_ratio)) as usize;

        let train = data.slice(0, train_end);
        let validate = data.slice(train_end, validate_end);
        let test = data.slice(validate_end, n);
        debug!(
            train = train.len(),
            validate = validate.len(),
            test = test.len(),
            "data_split"
        );
        (train, validate, test)
    }

    /// One independent pass over a split.
    fn run_split(&self, strategy: &dyn Strategy, data: &Frame, split_name: &str) -> SplitOutcome {
        if data.is_empty() {
            return SplitOutcome {
                equity: Vec::new(),
                trades: Vec::new(),
                metrics: None,
            };
        }

        let instrument = self.config.instruments[0].clone();
        let meta = StrategyMeta::for_pair(instrument.clone());
        let frame = strategy.populate_all(data.clone(), &meta);

        let mut state = SplitState::new(self.config.initial_capital);

        for i in 1..frame.len() {
            let bar = frame.bar(i).expect("index inside frame");
            let time = bar.date;
            let price = bar.close;
            let prev = i - 1;

            // Exit before entry.
            self.process_exit(&mut state, &frame, prev, &instrument, time, price);
            self.process_entry(&mut state, &frame, prev, &instrument, time, price);
            self.record_equity(&mut state, time, price);
        }

        // Close whatever is left at the final bar.
        if let Some(last) = frame.bar(frame.len() - 1) {
            let time = last.date;
            let price = last.close;
            let open: Vec<String> = state.positions.keys().cloned().collect();
            for instrument in open {
                self.close_position(&mut state, &instrument, time, price);
            }
        }

        let metrics = if !state.equity_curve.is_empty() && !state.trades.is_empty() {
            Some(self.metrics.calculate_all(
                &state.equity_curve,
                &state.trades,
                self.config.initial_capital,
            ))
        } else {
            None
        };

        debug!(
            split = split_name,
            trades = state.trades.len(),
            final_cash = state.cash,
            "split_complete"
        );

        SplitOutcome {
            equity: state.equity_curve,
            trades: state.trades,
            metrics,
        }
    }

    fn process_entry(
        &self,
        state: &mut SplitState,
        frame: &Frame,
        prev: usize,
        instrument: &str,
        time: DateTime<Utc>,
        price: f64,
    ) {
        if state.positions.contains_key(instrument) {
            return;
        }
        let side = if frame.signal_on(ENTER_LONG, prev) {
            TradeSide::Long
        } else if frame.signal_on(ENTER_SHORT, prev) {
            TradeSide::Short
        } else {
            return;
        };

        let position_value = state.cash * self.config.max_position_pct;
        if position_value <= 0.0 || price <= 0.0 {
            return;
        }

        let slip = price * self.config.slippage_bps / 10_000.0;
        let entry_price = match side {
            TradeSide::Long => price + slip,
            TradeSide::Short => price - slip,
        };
        let fees = position_value * (self.config.commission_bps / 10_000.0 / 2.0);
        let size = (position_value - fees) / entry_price;

        state.cash -= position_value;
        state.positions.insert(
            instrument.to_string(),
            OpenPosition {
                side,
                size,
                entry_price,
                entry_time: time,
                entry_fees: fees,
            },
        );
    }

    fn process_exit(
        &self,
        state: &mut SplitState,
        frame: &Frame,
        prev: usize,
        instrument: &str,
        time: DateTime<Utc>,
        price: f64,
    ) {
        let Some(position) = state.positions.get(instrument) else {
            return;
        };
        let should_exit = match position.side {
            TradeSide::Long => frame.signal_on(EXIT_LONG, prev),
            TradeSide::Short => frame.signal_on(EXIT_SHORT, prev),
        };
        if should_exit {
            self.close_position(state, instrument, time, price);
        }
    }

    fn close_position(
        &self,
        state: &mut SplitState,
        instrument: &str,
        time: DateTime<Utc>,
        price: f64,
    ) {
        let Some(position) = state.positions.remove(instrument) else {
            return;
        };

        let slip = price * self.config.slippage_bps / 10_000.0;
        let exit_price = match position.side {
            TradeSide::Long => price - slip,
            TradeSide::Short => price + slip,
        };

        let gross = match position.side {
            TradeSide::Long => (exit_price - position.entry_price) * position.size,
            TradeSide::Short => (position.entry_price - exit_price) * position.size,
        };
        let exit_fees = exit_price * position.size * (self.config.commission_bps / 10_000.0 / 2.0);
        let net = gross - exit_fees;
        let denom = position.entry_price * position.size;
        let pnl_percent = if denom != 0.0 { net / denom } else { 0.0 };

        state.cash += exit_price * position.size - exit_fees;
        state.trades.push(TradeRecord {
            id: Uuid::new_v4(),
            timestamp_open: position.entry_time,
            timestamp_close: Some(time),
            instrument: instrument.to_string(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            exit_price: Some(exit_price),
            pnl: Some(net),
            pnl_percent: Some(pnl_percent),
            fees: position.entry_fees + exit_fees,
            slippage: slip * 2.0,
        });
    }

    fn record_equity(&self, state: &mut SplitState, time: DateTime<Utc>, price: f64) {
        let mut position_value = 0.0;
        for position in state.positions.values() {
            position_value += match position.side {
                TradeSide::Long => position.size * price,
                TradeSide::Short => position.size * (2.0 * position.entry_price - price),
            };
        }
        let equity = state.cash + position_value;

        // O(1) incremental peak; never rescan the curve.
        if equity > state.equity_peak {
            state.equity_peak = equity;
        }
        let drawdown = if state.equity_peak > 0.0 {
            ((state.equity_peak - equity) / state.equity_peak).max(0.0)
        } else {
            0.0
        };

        state.equity_curve.push(EquityPoint {
            timestamp: time,
            equity,
            drawdown,
            position_value,
            cash: state.cash,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxd_strategy::Bar;

    struct NeverTrades;

    impl Strategy for NeverTrades {
        fn name(&self) -> &str {
            "never"
        }
        fn populate_indicators(&self, frame: Frame, _meta: &StrategyMeta) -> Frame {
            frame
        }
        fn populate_entry_trend(&self, frame: Frame, _meta: &StrategyMeta) -> Frame {
            frame
        }
        fn populate_exit_trend(&self, frame: Frame, _meta: &StrategyMeta) -> Frame {
            frame
        }
    }

    fn flat_frame(bars: usize) -> Frame {
        let epoch = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        Frame::new(
            (0..bars)
                .map(|i| Bar {
                    date: epoch + chrono::Duration::hours(i as i64),
                    open: 100.0,
                    high: 100.0,
                    low: 100.0,
                    close: 100.0,
                    volume: 10.0,
                })
                .collect(),
        )
    }

    fn config() -> BacktestConfig {
        BacktestConfig::new(
            "test",
            vec!["BTC-USD".to_string()],
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            DateTime::<Utc>::from_timestamp(1_701_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn no_signals_means_flat_equity_at_initial_capital() {
        let result = Backtester::new(config())
            .run_backtest(&NeverTrades, &flat_frame(100))
            .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.final_equity, 100_000.0);
        let first = result.equity_curve.first().unwrap();
        assert!((first.equity - 100_000.0).abs() < 1e-9);
        assert_eq!(result.metrics.max_drawdown, 0.0);
    }

    #[test]
    fn empty_frame_is_an_error() {
        let err = Backtester::new(config())
            .run_backtest(&NeverTrades, &Frame::default())
            .unwrap_err();
        assert_eq!(err, BacktestError::EmptyData);
    }

    #[test]
    fn costs_make_a_flat_round_trip_lose_money() {
        // Entry every 10 bars, hold 5, on a flat price: every trade loses
        // exactly the fees + slippage.
        let strategy = cxd_testkit::MockStrategy::new(10, 5);
        let result = Backtester::new(config())
            .run_backtest(&strategy, &flat_frame(200))
            .unwrap();
        assert!(!result.trades.is_empty());
        for trade in &result.trades {
            let pnl = trade.pnl.unwrap();
            assert!(pnl < 0.0, "flat market round trips must pay costs, got {pnl}");
            assert!(trade.fees > 0.0);
        }
        assert!(result.final_equity < 100_000.0);
    }
}
