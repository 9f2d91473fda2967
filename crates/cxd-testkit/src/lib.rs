//! Test fixtures shared across the workspace: seeded synthetic OHLCV and a
//! deterministic mock strategy.
//!
//! Everything here is seeded and reproducible — scenario tests assert
//! bit-identical replays on top of these fixtures.

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use cxd_strategy::{Bar, Frame, Strategy, StrategyMeta, ENTER_LONG, EXIT_LONG};

/// Fixed origin so generated frames are identical across runs.
fn fixture_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("static timestamp")
}

/// Generate `bars` hourly OHLCV bars as a geometric random walk with a mild
/// drift. Same seed, same series.
pub fn synthetic_ohlcv(seed: u64, bars: usize) -> Frame {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut price = 100.0_f64;
    let mut out = Vec::with_capacity(bars);

    for i in 0..bars {
        let drift = 0.0002;
        let shock = rng.gen_range(-0.01..=0.01);
        let open = price;
        let close = (open * (1.0 + drift + shock)).max(0.01);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..=0.003));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..=0.003));
        let volume = rng.gen_range(50.0..=500.0);

        out.push(Bar {
            date: fixture_epoch() + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume,
        });
        price = close;
    }
    Frame::new(out)
}

/// Deterministic strategy: enter long every `entry_every` bars, exit after
/// `hold` bars. Pure function of the frame — no clock, no randomness.
pub struct MockStrategy {
    pub entry_every: usize,
    pub hold: usize,
}

impl MockStrategy {
    pub fn new(entry_every: usize, hold: usize) -> Self {
        debug_assert!(entry_every > 0 && hold > 0);
        Self { entry_every, hold }
    }
}

impl Strategy for MockStrategy {
    fn name(&self) -> &str {
        "mock"
    }

    fn populate_indicators(&self, frame: Frame, _meta: &StrategyMeta) -> Frame {
        frame
    }

    fn populate_entry_trend(&self, mut frame: Frame, _meta: &StrategyMeta) -> Frame {
        for i in 0..frame.len() {
            if i > 0 && i % self.entry_every == 0 {
                frame.set_signal(ENTER_LONG, i, 1.0);
            }
        }
        frame
    }

    fn populate_exit_trend(&self, mut frame: Frame, _meta: &StrategyMeta) -> Frame {
        for i in 0..frame.len() {
            if i >= self.hold && (i - self.hold) % self.entry_every == 0 && i - self.hold > 0 {
                frame.set_signal(EXIT_LONG, i, 1.0);
            }
        }
        frame
    }
}
