//! CrossDesk operational CLI.
//!
//! Exit codes: 0 success, 1 validation error (bad config/input), 2 runtime
//! error. Failures print a single-line reason with the relevant ids.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cxd")]
#[command(about = "CrossDesk multi-venue trading engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest over an OHLCV CSV file.
    Backtest(commands::backtest::BacktestArgs),

    /// Run walk-forward analysis over an OHLCV CSV file.
    WalkForward(commands::backtest::WalkForwardArgs),

    /// Run the live multi-strategy supervisor until interrupted.
    Live(commands::live::LiveArgs),

    /// Cancel an open order on a venue.
    CancelOrder(commands::ops::CancelOrderArgs),

    /// Activate or clear the kill switch.
    KillSwitch(commands::ops::KillSwitchArgs),
}

#[tokio::main]
async fn main() {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let outcome = match cli.cmd {
        Commands::Backtest(args) => commands::backtest::run_backtest(args).await,
        Commands::WalkForward(args) => commands::backtest::run_walk_forward(args).await,
        Commands::Live(args) => commands::live::run_live(args).await,
        Commands::CancelOrder(args) => commands::ops::cancel_order(args).await,
        Commands::KillSwitch(args) => commands::ops::kill_switch(args).await,
    };

    match outcome {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(commands::exit_code(&e));
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
