//! Performance metrics over equity curves and trade lists.
//!
//! All ratios are annualised assuming 252 trading days. Every value that
//! leaves this crate passes [`finite_or_zero`] — NaN and ±∞ intermediates
//! become 0 rather than escaping into reports or stores.
//!
//! Pure and synchronous: callers run it off the IO scheduler.

use chrono::{DateTime, Utc};

use cxd_domain::{EquityPoint, PerformanceMetrics, TradeRecord, TradeSide};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Replace non-finite values with 0.
pub fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Metric calculator with a configurable annual risk-free rate.
#[derive(Clone, Debug)]
pub struct MetricsCalculator {
    risk_free_rate: f64,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl MetricsCalculator {
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    /// Compute the full metric set.
    pub fn calculate_all(
        &self,
        equity_curve: &[EquityPoint],
        trades: &[TradeRecord],
        initial_capital: f64,
    ) -> PerformanceMetrics {
        let series = equity_series(equity_curve);
        let returns = period_returns(&series);

        let final_equity = series.last().map(|(_, e)| *e).unwrap_or(initial_capital);
        let total_return = if initial_capital > 0.0 {
            final_equity / initial_capital - 1.0
        } else {
            0.0
        };
        let annualized_return = self.annualized_return(total_return, &series);

        let sharpe_ratio = self.sharpe(&returns);
        let sortino_ratio = self.sortino(&returns);
        let max_drawdown = max_drawdown(&series);
        let max_drawdown_duration_days = max_drawdown_duration_days(&series);
        let avg_drawdown = average_drawdown(&series);
        let calmar_ratio = calmar(annualized_return, max_drawdown);

        let stats = trade_statistics(trades);

        PerformanceMetrics {
            total_return: finite_or_zero(total_return),
            annualized_return: finite_or_zero(annualized_return),
            sharpe_ratio: finite_or_zero(sharpe_ratio),
            sortino_ratio: finite_or_zero(sortino_ratio),
            calmar_ratio: finite_or_zero(calmar_ratio),
            max_drawdown: finite_or_zero(max_drawdown),
            max_drawdown_duration_days,
            avg_drawdown: finite_or_zero(avg_drawdown),
            volatility: finite_or_zero(annualized_volatility(&returns)),
            downside_volatility: finite_or_zero(downside_volatility(&returns)),
            var_95: finite_or_zero(value_at_risk(&returns, 0.95)),
            cvar_95: finite_or_zero(conditional_var(&returns, 0.95)),
            ..stats
        }
    }

    fn annualized_return(&self, total_return: f64, series: &[(DateTime<Utc>, f64)]) -> f64 {
        let (Some((start, _)), Some((end, _))) = (series.first(), series.last()) else {
            return 0.0;
        };
        let days = (*end - *start).num_days();
        if days <= 0 {
            return 0.0;
        }
        (1.0 + total_return).powf(TRADING_DAYS_PER_YEAR / days as f64) - 1.0
    }

    /// Annualised Sharpe: `mean(excess) / std(excess) * sqrt(252)`.
    fn sharpe(&self, returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let daily_rf = self.risk_free_rate / TRADING_DAYS_PER_YEAR;
        let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
        let std = sample_std(&excess);
        if std == 0.0 || !std.is_finite() {
            return 0.0;
        }
        mean(&excess) / std * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Annualised Sortino: same numerator, RMS of negative excess below.
    fn sortino(&self, returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let daily_rf = self.risk_free_rate / TRADING_DAYS_PER_YEAR;
        let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
        let downside_sq: f64 = excess.iter().map(|e| e.min(0.0).powi(2)).sum::<f64>()
            / excess.len() as f64;
        let downside_dev = downside_sq.sqrt();
        if downside_dev == 0.0 || !downside_dev.is_finite() {
            return 0.0;
        }
        mean(&excess) / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }
}

// ---------------------------------------------------------------------------
// Series helpers
// ---------------------------------------------------------------------------

/// Equity curve as a `(timestamp, equity)` series: sorted by time, duplicate
/// timestamps keep the last value.
fn equity_series(curve: &[EquityPoint]) -> Vec<(DateTime<Utc>, f64)> {
    let mut series: Vec<(DateTime<Utc>, f64)> =
        curve.iter().map(|p| (p.timestamp, p.equity)).collect();
    series.sort_by_key(|(t, _)| *t);
    series.dedup_by(|later, earlier| {
        if later.0 == earlier.0 {
            // keep the later-inserted value
            earlier.1 = later.1;
            true
        } else {
            false
        }
    });
    series
}

/// Percent changes between consecutive equity points; non-finite values
/// (zero denominators) are dropped.
fn period_returns(series: &[(DateTime<Utc>, f64)]) -> Vec<f64> {
    series
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].1;
            let next = w[1].1;
            if prev == 0.0 {
                return None;
            }
            let r = next / prev - 1.0;
            r.is_finite().then_some(r)
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (ddof = 1), matching the reference statistics.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    var.sqrt()
}

/// Linear-interpolation percentile of `values` at `pct` in [0, 100].
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (sorted.len() as f64 - 1.0) * pct / 100.0;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

// ---------------------------------------------------------------------------
// Drawdown family
// ---------------------------------------------------------------------------

/// Max peak-to-trough drawdown over an expanding peak, in [0, 1].
pub fn max_drawdown(series: &[(DateTime<Utc>, f64)]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst: f64 = 0.0;
    for (_, equity) in series {
        if *equity > peak {
            peak = *equity;
        }
        if peak > 0.0 {
            worst = worst.max((peak - equity) / peak);
        }
    }
    worst
}

/// Longest run, in calendar days, during which equity is strictly below the
/// running peak. Zero on a strictly increasing curve.
pub fn max_drawdown_duration_days(series: &[(DateTime<Utc>, f64)]) -> i64 {
    let Some((first_ts, _)) = series.first() else {
        return 0;
    };
    let mut peak = f64::MIN;
    let mut last_peak_time = *first_ts;
    let mut drawdown_start: Option<DateTime<Utc>> = None;
    let mut longest: i64 = 0;

    for (ts, equity) in series {
        if *equity >= peak {
            peak = *equity;
            if let Some(start) = drawdown_start.take() {
                longest = longest.max((*ts - start).num_days());
            }
            last_peak_time = *ts;
        } else if drawdown_start.is_none() {
            drawdown_start = Some(last_peak_time);
        }
    }

    if let (Some(start), Some((end, _))) = (drawdown_start, series.last()) {
        longest = longest.max((*end - start).num_days());
    }
    longest
}

fn average_drawdown(series: &[(DateTime<Utc>, f64)]) -> f64 {
    let mut peak = f64::MIN;
    let mut drawdowns = Vec::new();
    for (_, equity) in series {
        if *equity > peak {
            peak = *equity;
        }
        if peak > 0.0 {
            let dd = (equity - peak) / peak;
            if dd < 0.0 {
                drawdowns.push(-dd);
            }
        }
    }
    mean(&drawdowns)
}

/// Calmar: annualised return over |max drawdown|; 0 when drawdown is 0.
pub fn calmar(annualized_return: f64, max_drawdown: f64) -> f64 {
    if max_drawdown <= 0.0 {
        return 0.0;
    }
    annualized_return / max_drawdown.abs()
}

// ---------------------------------------------------------------------------
// Tail risk
// ---------------------------------------------------------------------------

/// VaR at confidence `c`: |percentile(returns, (1-c)*100)|.
pub fn value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    percentile(returns, (1.0 - confidence) * 100.0).abs()
}

/// CVaR at confidence `c`: |mean of returns at or below the VaR threshold|.
pub fn conditional_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let threshold = percentile(returns, (1.0 - confidence) * 100.0);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
    if tail.is_empty() {
        return 0.0;
    }
    mean(&tail).abs()
}

fn annualized_volatility(returns: &[f64]) -> f64 {
    sample_std(returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

fn downside_volatility(returns: &[f64]) -> f64 {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    sample_std(&downside) * TRADING_DAYS_PER_YEAR.sqrt()
}

// ---------------------------------------------------------------------------
// Trade statistics
// ---------------------------------------------------------------------------

/// Trade-level statistics, returned inside a `PerformanceMetrics` with the
/// ratio fields zeroed (the caller overlays them).
pub fn trade_statistics(trades: &[TradeRecord]) -> PerformanceMetrics {
    let total_trades = trades.len();
    if total_trades == 0 {
        return PerformanceMetrics::default();
    }

    let mut pnls = Vec::new();
    let mut durations_hours = Vec::new();
    for t in trades {
        let pnl = t.pnl.or_else(|| {
            // Open trades have no pnl; derive from exit when present.
            t.exit_price.map(|exit| match t.side {
                TradeSide::Long => (exit - t.entry_price) * t.size,
                TradeSide::Short => (t.entry_price - exit) * t.size,
            })
        });
        if let Some(p) = pnl {
            if p.is_finite() {
                pnls.push(p);
            }
        }
        if let Some(close) = t.timestamp_close {
            durations_hours.push((close - t.timestamp_open).num_seconds() as f64 / 3600.0);
        }
    }

    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum::<f64>().abs();

    PerformanceMetrics {
        total_trades,
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: finite_or_zero(wins.len() as f64 / total_trades as f64),
        profit_factor: if gross_loss > 0.0 {
            finite_or_zero(gross_profit / gross_loss)
        } else {
            0.0
        },
        avg_win: finite_or_zero(mean(&wins)),
        avg_loss: finite_or_zero(mean(&losses)),
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
        avg_trade_duration_hours: finite_or_zero(mean(&durations_hours)),
        gross_profit: finite_or_zero(gross_profit),
        gross_loss: finite_or_zero(gross_loss),
        ..PerformanceMetrics::default()
    }
}
