//! Per-timeframe trend signal.
//!
//! `delta = (close_last - SMA10(close)) / SMA10(close)`, classified with a
//! 5 bps neutral band. Strength is `|delta|` in basis points; confidence is
//! `min(1, |delta| * 200)`.

use cxd_domain::TrendDirection;

const SMA_WINDOW: usize = 10;
const NEUTRAL_BAND: f64 = 0.0005;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrendSignal {
    pub direction: TrendDirection,
    pub confidence: f64,
    pub strength_bps: f64,
}

impl TrendSignal {
    fn neutral(strength_bps: f64) -> Self {
        Self {
            direction: TrendDirection::Neutral,
            confidence: 0.0,
            strength_bps,
        }
    }
}

/// Classify the trailing trend of `closes` (oldest first). Fewer than 10
/// samples is always neutral.
pub fn trend_signal(closes: &[f64]) -> TrendSignal {
    if closes.len() < SMA_WINDOW {
        return TrendSignal::neutral(0.0);
    }

    let current = closes[closes.len() - 1];
    let sma: f64 =
        closes[closes.len() - SMA_WINDOW..].iter().sum::<f64>() / SMA_WINDOW as f64;
    if sma == 0.0 {
        return TrendSignal::neutral(0.0);
    }

    let delta = (current - sma) / sma;
    let strength_bps = delta.abs() * 10_000.0;

    if delta.abs() < NEUTRAL_BAND {
        return TrendSignal::neutral(strength_bps);
    }

    TrendSignal {
        direction: if delta > 0.0 {
            TrendDirection::Bullish
        } else {
            TrendDirection::Bearish
        },
        confidence: (delta.abs() * 200.0).min(1.0),
        strength_bps,
    }
}
