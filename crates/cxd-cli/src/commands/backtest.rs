//! `cxd backtest` and `cxd walk-forward`.

use anyhow::{Context, Result};
use clap::Args;

use cxd_backtest::{
    load_ohlcv_csv, BacktestConfig, BacktestResult, Backtester, WalkForwardConfig,
    WalkForwardEngine,
};
use cxd_strategy::{SmaCross, Strategy};
use cxd_testkit::MockStrategy;

#[derive(Args)]
pub struct BacktestArgs {
    /// OHLCV CSV file (`date,open,high,low,close,volume`).
    #[arg(long)]
    pub data: String,

    /// Strategy: `sma-cross` or `mock`.
    #[arg(long, default_value = "sma-cross")]
    pub strategy: String,

    #[arg(long, default_value = "BTC-USD")]
    pub instrument: String,

    #[arg(long, default_value_t = 100_000.0)]
    pub initial_capital: f64,

    #[arg(long, default_value_t = 5.0)]
    pub slippage_bps: f64,

    #[arg(long, default_value_t = 10.0)]
    pub commission_bps: f64,

    #[arg(long, default_value_t = 0.6)]
    pub train_ratio: f64,

    #[arg(long, default_value_t = 0.2)]
    pub validate_ratio: f64,

    #[arg(long, default_value_t = 0.2)]
    pub test_ratio: f64,

    #[arg(long, default_value_t = 0.1)]
    pub max_position_pct: f64,

    /// SMA windows for `sma-cross`.
    #[arg(long, default_value_t = 10)]
    pub fast: usize,
    #[arg(long, default_value_t = 30)]
    pub slow: usize,

    /// Cadence parameters for `mock`.
    #[arg(long, default_value_t = 10)]
    pub entry_every: usize,
    #[arg(long, default_value_t = 5)]
    pub hold: usize,
}

#[derive(Args)]
pub struct WalkForwardArgs {
    #[command(flatten)]
    pub backtest: BacktestArgs,

    #[arg(long, default_value_t = 200)]
    pub train_window: usize,

    #[arg(long, default_value_t = 100)]
    pub test_window: usize,

    #[arg(long, default_value_t = 100)]
    pub step_size: usize,
}

fn resolve_strategy(args: &BacktestArgs) -> Result<Box<dyn Strategy>> {
    match args.strategy.as_str() {
        "sma-cross" => Ok(Box::new(SmaCross::new(args.fast, args.slow))),
        "mock" => Ok(Box::new(MockStrategy::new(args.entry_every, args.hold))),
        other => anyhow::bail!("unknown strategy: {other} (expected sma-cross or mock)"),
    }
}

fn build_config(args: &BacktestArgs, data: &cxd_strategy::Frame) -> Result<BacktestConfig> {
    let start = data
        .bars()
        .first()
        .context("empty data")?
        .date;
    let end = data.bars().last().context("empty data")?.date;

    let mut config = BacktestConfig::new(
        args.strategy.clone(),
        vec![args.instrument.clone()],
        start,
        end,
    );
    config.initial_capital = args.initial_capital;
    config.slippage_bps = args.slippage_bps;
    config.commission_bps = args.commission_bps;
    config.train_ratio = args.train_ratio;
    config.validate_ratio = args.validate_ratio;
    config.test_ratio = args.test_ratio;
    config.max_position_pct = args.max_position_pct;
    config.validate()?;
    Ok(config)
}

pub async fn run_backtest(args: BacktestArgs) -> Result<()> {
    let data = load_ohlcv_csv(&args.data)?;
    let config = build_config(&args, &data)?;
    let strategy = resolve_strategy(&args)?;

    // The bar loop is CPU-bound; keep it off the IO scheduler.
    let result = tokio::task::spawn_blocking(move || {
        Backtester::new(config).run_backtest(strategy.as_ref(), &data)
    })
    .await
    .context("backtest task panicked")??;

    print_result(&result);
    Ok(())
}

pub async fn run_walk_forward(args: WalkForwardArgs) -> Result<()> {
    let data = load_ohlcv_csv(&args.backtest.data)?;
    let base_config = build_config(&args.backtest, &data)?;
    let strategy = resolve_strategy(&args.backtest)?;

    let wf_config = WalkForwardConfig {
        train_window: args.train_window,
        test_window: args.test_window,
        step_size: args.step_size,
        initial_capital: args.backtest.initial_capital,
        timeframe: base_config.timeframe.clone(),
        slippage_bps: args.backtest.slippage_bps,
        commission_bps: args.backtest.commission_bps,
    };

    let result = tokio::task::spawn_blocking(move || {
        WalkForwardEngine::new(wf_config).run(strategy.as_ref(), &data, &base_config)
    })
    .await
    .context("walk-forward task panicked")??;

    println!("windows={}", result.total_windows);
    if let Some(metrics) = &result.aggregate_metrics {
        println!("aggregate_total_return={:.6}", metrics.total_return);
        println!("aggregate_sharpe={:.4}", metrics.sharpe_ratio);
        println!("aggregate_max_drawdown={:.4}", metrics.max_drawdown);
        println!("aggregate_trades={}", metrics.total_trades);
    }
    for (i, window) in result.window_results.iter().enumerate() {
        println!(
            "window={} start={} end={} final_equity={:.2} trades={}",
            i,
            window.start_date,
            window.end_date,
            window.final_equity,
            window.trades.len()
        );
    }
    Ok(())
}

fn print_result(result: &BacktestResult) {
    println!("backtest_id={}", result.id);
    println!("strategy={}", result.strategy_name);
    println!("bars_start={}", result.start_date);
    println!("bars_end={}", result.end_date);
    println!("initial_capital={:.2}", result.initial_capital);
    println!("final_equity={:.2}", result.final_equity);
    println!("trades={}", result.trades.len());
    println!("total_return={:.6}", result.metrics.total_return);
    println!("annualized_return={:.6}", result.metrics.annualized_return);
    println!("sharpe={:.4}", result.metrics.sharpe_ratio);
    println!("sortino={:.4}", result.metrics.sortino_ratio);
    println!("calmar={:.4}", result.metrics.calmar_ratio);
    println!("max_drawdown={:.4}", result.metrics.max_drawdown);
    println!("win_rate={:.4}", result.metrics.win_rate);
    println!("profit_factor={:.4}", result.metrics.profit_factor);
    for (label, metrics) in [
        ("in_sample", &result.in_sample_metrics),
        ("validation", &result.validation_metrics),
        ("out_sample", &result.out_sample_metrics),
    ] {
        if let Some(m) = metrics {
            println!(
                "{label}: return={:.4} sharpe={:.3} max_dd={:.4} trades={}",
                m.total_return, m.sharpe_ratio, m.max_drawdown, m.total_trades
            );
        }
    }
    println!(
        "execution_time_seconds={:.3}",
        result.execution_time_seconds
    );
}
