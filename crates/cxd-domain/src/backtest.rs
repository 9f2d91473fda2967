use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Long/short tag for backtest trade records. Distinct from [`crate::Side`]:
/// a short position is opened by selling but the trade record tracks the
/// position's direction, not the order flow.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

/// One point of the equity curve, recorded per bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    /// Drawdown from the running peak, in [0, 1].
    pub drawdown: f64,
    pub position_value: f64,
    pub cash: f64,
}

/// One round trip (or open position) recorded by the backtester.
/// `pnl` is `None` while the trade is open.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub timestamp_open: DateTime<Utc>,
    pub timestamp_close: Option<DateTime<Utc>>,
    pub instrument: String,
    pub side: TradeSide,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    /// Entry + exit commission, in quote currency.
    pub fees: f64,
    /// Total entry + exit slippage, in quote currency per unit.
    pub slippage: f64,
}

/// The full metric set produced by the performance calculator.
/// Every field is guaranteed finite (NaN/±∞ are replaced by 0).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration_days: i64,
    pub avg_drawdown: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_trade_duration_hours: f64,
    pub volatility: f64,
    pub downside_volatility: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
}

impl PerformanceMetrics {
    /// True when every value is finite. The calculator guarantees this; the
    /// check exists for tests and defensive assertions at ingestion points.
    pub fn all_finite(&self) -> bool {
        [
            self.total_return,
            self.annualized_return,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.max_drawdown,
            self.avg_drawdown,
            self.win_rate,
            self.profit_factor,
            self.avg_win,
            self.avg_loss,
            self.largest_win,
            self.largest_loss,
            self.avg_trade_duration_hours,
            self.volatility,
            self.downside_volatility,
            self.var_95,
            self.cvar_95,
            self.gross_profit,
            self.gross_loss,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}
