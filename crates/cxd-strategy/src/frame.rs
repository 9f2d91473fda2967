//! A minimal OHLCV frame with named signal columns.
//!
//! Bars are append-only and index-aligned with every signal column. Signal
//! columns default to 0.0; reading an absent column or out-of-range index
//! yields 0.0 rather than panicking, matching how strategies probe for
//! optional columns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ENTER_LONG: &str = "enter_long";
pub const ENTER_SHORT: &str = "enter_short";
pub const EXIT_LONG: &str = "exit_long";
pub const EXIT_SHORT: &str = "exit_short";

/// One OHLCV bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// OHLCV frame plus named, index-aligned signal columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    bars: Vec<Bar>,
    signals: BTreeMap<String, Vec<f64>>,
}

impl Frame {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            signals: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bar(&self, idx: usize) -> Option<&Bar> {
        self.bars.get(idx)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Row-slice of the frame, signals included. Used for split boundaries.
    pub fn slice(&self, start: usize, end: usize) -> Frame {
        let end = end.min(self.bars.len());
        let start = start.min(end);
        let bars = self.bars[start..end].to_vec();
        let signals = self
            .signals
            .iter()
            .map(|(name, col)| (name.clone(), col[start..end].to_vec()))
            .collect();
        Frame { bars, signals }
    }

    /// Write one signal value; the column is created (zero-filled) on first
    /// write.
    pub fn set_signal(&mut self, name: &str, idx: usize, value: f64) {
        let len = self.bars.len();
        let col = self
            .signals
            .entry(name.to_string())
            .or_insert_with(|| vec![0.0; len]);
        if idx < col.len() {
            col[idx] = value;
        }
    }

    /// Read one signal value; absent columns and out-of-range indices read
    /// as 0.0.
    pub fn signal(&self, name: &str, idx: usize) -> f64 {
        self.signals
            .get(name)
            .and_then(|col| col.get(idx))
            .copied()
            .unwrap_or(0.0)
    }

    /// True when the signal column holds 1.0 at `idx`.
    pub fn signal_on(&self, name: &str, idx: usize) -> bool {
        self.signal(name, idx) == 1.0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }
}

/// Simple moving average of the trailing `window` values ending at (and
/// including) `values[..=idx]`. `None` when fewer than `window` samples are
/// available.
pub fn sma(values: &[f64], idx: usize, window: usize) -> Option<f64> {
    if window == 0 || idx + 1 < window || idx >= values.len() {
        return None;
    }
    let start = idx + 1 - window;
    let sum: f64 = values[start..=idx].iter().sum();
    Some(sum / window as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                date: Utc::now() + chrono::Duration::minutes(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn absent_signal_reads_zero() {
        let f = Frame::new(bars(&[1.0, 2.0]));
        assert_eq!(f.signal(ENTER_LONG, 0), 0.0);
        assert!(!f.signal_on(ENTER_LONG, 1));
    }

    #[test]
    fn set_signal_creates_aligned_column() {
        let mut f = Frame::new(bars(&[1.0, 2.0, 3.0]));
        f.set_signal(ENTER_LONG, 1, 1.0);
        assert!(f.signal_on(ENTER_LONG, 1));
        assert!(!f.signal_on(ENTER_LONG, 0));
        assert!(!f.signal_on(ENTER_LONG, 2));
    }

    #[test]
    fn slice_preserves_signals() {
        let mut f = Frame::new(bars(&[1.0, 2.0, 3.0, 4.0]));
        f.set_signal(ENTER_LONG, 2, 1.0);
        let s = f.slice(1, 3);
        assert_eq!(s.len(), 2);
        assert!(s.signal_on(ENTER_LONG, 1));
    }

    #[test]
    fn sma_needs_full_window() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&values, 2, 3), Some(2.0));
        assert_eq!(sma(&values, 1, 3), None);
        assert_eq!(sma(&values, 3, 2), Some(3.5));
        assert_eq!(sma(&values, 9, 2), None);
    }
}
