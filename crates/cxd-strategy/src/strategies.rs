//! Built-in strategies.

use serde_json::Value;

use crate::frame::{sma, Frame, ENTER_LONG, ENTER_SHORT, EXIT_LONG, EXIT_SHORT};
use crate::{Strategy, StrategyMeta};

/// Dual-SMA crossover: long when the fast average crosses above the slow,
/// short on the opposite cross; exits mirror the entries.
///
/// Parameters (from `meta.parameters`): `fast` (default 10), `slow`
/// (default 30).
pub struct SmaCross {
    fast: usize,
    slow: usize,
}

impl SmaCross {
    pub fn new(fast: usize, slow: usize) -> Self {
        debug_assert!(fast < slow, "fast window must be shorter than slow");
        Self { fast, slow }
    }

    pub fn from_parameters(parameters: &Value) -> Self {
        let fast = parameters["fast"].as_u64().unwrap_or(10) as usize;
        let slow = parameters["slow"].as_u64().unwrap_or(30) as usize;
        Self::new(fast.max(1), slow.max(2))
    }

    fn crossed_above(&self, closes: &[f64], i: usize) -> Option<bool> {
        if i == 0 {
            return None;
        }
        let fast_now = sma(closes, i, self.fast)?;
        let slow_now = sma(closes, i, self.slow)?;
        let fast_prev = sma(closes, i - 1, self.fast)?;
        let slow_prev = sma(closes, i - 1, self.slow)?;
        if fast_prev <= slow_prev && fast_now > slow_now {
            Some(true)
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Some(false)
        } else {
            None
        }
    }
}

impl Default for SmaCross {
    fn default() -> Self {
        Self::new(10, 30)
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma-cross"
    }

    fn populate_indicators(&self, frame: Frame, _meta: &StrategyMeta) -> Frame {
        // The crossover reads SMAs directly; no derived columns needed.
        frame
    }

    fn populate_entry_trend(&self, mut frame: Frame, _meta: &StrategyMeta) -> Frame {
        let closes = frame.closes();
        for i in 0..closes.len() {
            match self.crossed_above(&closes, i) {
                Some(true) => frame.set_signal(ENTER_LONG, i, 1.0),
                Some(false) => frame.set_signal(ENTER_SHORT, i, 1.0),
                None => {}
            }
        }
        frame
    }

    fn populate_exit_trend(&self, mut frame: Frame, _meta: &StrategyMeta) -> Frame {
        let closes = frame.closes();
        for i in 0..closes.len() {
            match self.crossed_above(&closes, i) {
                Some(true) => frame.set_signal(EXIT_SHORT, i, 1.0),
                Some(false) => frame.set_signal(EXIT_LONG, i, 1.0),
                None => {}
            }
        }
        frame
    }
}
