use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cxd_domain::{EquityPoint, PerformanceMetrics, TradeRecord};

/// Backtest run configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub strategy_name: String,
    pub instruments: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub timeframe: String,
    /// Entry/exit slippage in basis points, applied adversely.
    pub slippage_bps: f64,
    /// Round-trip commission in basis points, split half per side.
    pub commission_bps: f64,
    pub train_ratio: f64,
    pub validate_ratio: f64,
    pub test_ratio: f64,
    /// Max fraction of cash committed per position.
    pub max_position_pct: f64,
}

impl BacktestConfig {
    pub fn new(
        strategy_name: impl Into<String>,
        instruments: Vec<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            instruments,
            start_date,
            end_date,
            initial_capital: 100_000.0,
            timeframe: "1h".to_string(),
            slippage_bps: 5.0,
            commission_bps: 10.0,
            train_ratio: 0.6,
            validate_ratio: 0.2,
            test_ratio: 0.2,
            max_position_pct: 0.1,
        }
    }

    /// Fatal-on-construction validation: bad configs never reach the bar
    /// loop.
    pub fn validate(&self) -> Result<(), BacktestError> {
        let ratio_sum = self.train_ratio + self.validate_ratio + self.test_ratio;
        if !(0.99..=1.01).contains(&ratio_sum) {
            return Err(BacktestError::InvalidConfig(format!(
                "split ratios must sum to 1.0, got {ratio_sum}"
            )));
        }
        if self.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidConfig(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.start_date >= self.end_date {
            return Err(BacktestError::InvalidConfig(
                "start date must be before end date".to_string(),
            ));
        }
        if self.instruments.is_empty() {
            return Err(BacktestError::InvalidConfig(
                "at least one instrument is required".to_string(),
            ));
        }
        if self.slippage_bps < 0.0 || self.commission_bps < 0.0 {
            // Negative costs would make fills systematically favorable.
            return Err(BacktestError::InvalidConfig(
                "slippage and commission must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backtest failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacktestError {
    InvalidConfig(String),
    EmptyData,
    /// The input file lacked required OHLCV columns.
    MissingColumns(Vec<String>),
    Loader(String),
}

impl std::fmt::Display for BacktestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BacktestError::InvalidConfig(msg) => write!(f, "invalid backtest config: {msg}"),
            BacktestError::EmptyData => write!(f, "backtest data is empty"),
            BacktestError::MissingColumns(cols) => {
                write!(f, "data missing required columns: {}", cols.join(", "))
            }
            BacktestError::Loader(msg) => write!(f, "ohlcv loader error: {msg}"),
        }
    }
}

impl std::error::Error for BacktestError {}

/// Equity, trades and metrics for one split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub equity: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub metrics: Option<PerformanceMetrics>,
}

/// The full backtest result: concatenated equity/trades across splits plus
/// per-split metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: Uuid,
    pub strategy_name: String,
    pub instruments: Vec<String>,
    pub timeframe: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub metrics: PerformanceMetrics,
    pub in_sample_metrics: Option<PerformanceMetrics>,
    pub validation_metrics: Option<PerformanceMetrics>,
    pub out_sample_metrics: Option<PerformanceMetrics>,
    pub execution_time_seconds: f64,
    pub created_at: DateTime<Utc>,
}
