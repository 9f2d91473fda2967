pub mod backtest;
pub mod live;
pub mod ops;

use cxd_backtest::BacktestError;
use cxd_config::ConfigError;

/// Map an error chain to the CLI's exit-code contract:
/// 1 for validation problems, 2 for runtime failures.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<ConfigError>() {
            return 1;
        }
        if let Some(bt) = cause.downcast_ref::<BacktestError>() {
            return match bt {
                BacktestError::InvalidConfig(_)
                | BacktestError::EmptyData
                | BacktestError::MissingColumns(_)
                | BacktestError::Loader(_) => 1,
            };
        }
    }
    2
}
