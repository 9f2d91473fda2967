//! Rolling close-price history for the live scanner.
//!
//! The market-data pump feeds every observed mid price in here; the
//! scanner's [`OhlcvSource`] reads per-timeframe close series back out by
//! bucketing the raw samples. Bounded memory: a fixed number of samples per
//! instrument, oldest evicted first.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use cxd_scanner::OhlcvSource;

const MAX_SAMPLES_PER_INSTRUMENT: usize = 20_000;

/// Parse a timeframe label (`"5m"`, `"1h"`, `"4h"`, `"1d"`, `"30s"`) into
/// seconds. Unknown labels return `None`.
pub fn timeframe_seconds(timeframe: &str) -> Option<i64> {
    let timeframe = timeframe.trim().to_lowercase();
    let (number, unit) = timeframe.split_at(timeframe.len().checked_sub(1)?);
    let n: i64 = number.parse().ok()?;
    if n <= 0 {
        return None;
    }
    match unit {
        "s" => Some(n),
        "m" => Some(n * 60),
        "h" => Some(n * 3_600),
        "d" => Some(n * 86_400),
        _ => None,
    }
}

#[derive(Default)]
struct Inner {
    /// instrument -> (timestamp, price) samples, oldest first.
    samples: BTreeMap<String, VecDeque<(DateTime<Utc>, f64)>>,
}

/// Shared rolling sample buffer.
#[derive(Default)]
pub struct CandleBuffer {
    inner: RwLock<Inner>,
}

impl CandleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed price.
    pub async fn observe(&self, instrument: &str, price: f64) {
        if price <= 0.0 || !price.is_finite() {
            return;
        }
        let mut g = self.inner.write().await;
        let series = g
            .samples
            .entry(instrument.to_uppercase())
            .or_default();
        if series.len() == MAX_SAMPLES_PER_INSTRUMENT {
            series.pop_front();
        }
        series.push_back((Utc::now(), price));
    }

    /// Test/backfill entry point with an explicit timestamp.
    pub async fn observe_at(&self, instrument: &str, price: f64, ts: DateTime<Utc>) {
        let mut g = self.inner.write().await;
        let series = g
            .samples
            .entry(instrument.to_uppercase())
            .or_default();
        if series.len() == MAX_SAMPLES_PER_INSTRUMENT {
            series.pop_front();
        }
        series.push_back((ts, price));
    }
}

#[async_trait]
impl OhlcvSource for CandleBuffer {
    async fn fetch_closes(
        &self,
        instrument: &str,
        timeframe: &str,
        limit: usize,
    ) -> Option<Vec<f64>> {
        let secs = timeframe_seconds(timeframe)?;
        let g = self.inner.read().await;
        let series = g.samples.get(&instrument.to_uppercase())?;
        if series.is_empty() {
            return None;
        }

        // Bucket samples by timeframe; the last sample in each bucket is
        // that bucket's close.
        let mut closes: Vec<f64> = Vec::new();
        let mut current_bucket: Option<i64> = None;
        for (ts, price) in series.iter() {
            let bucket = ts.timestamp() / secs;
            match current_bucket {
                Some(b) if b == bucket => {
                    *closes.last_mut().expect("bucket open implies a close") = *price;
                }
                _ => {
                    current_bucket = Some(bucket);
                    closes.push(*price);
                }
            }
        }

        let start = closes.len().saturating_sub(limit);
        Some(closes[start..].to_vec())
    }
}
