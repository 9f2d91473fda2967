use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quality tag carried on every market snapshot. Consumers must reject
/// `Unavailable` data rather than guess.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    Realtime,
    Delayed,
    Derived,
    Simulated,
    Unavailable,
}

impl DataQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            DataQuality::Realtime => "realtime",
            DataQuality::Delayed => "delayed",
            DataQuality::Derived => "derived",
            DataQuality::Simulated => "simulated",
            DataQuality::Unavailable => "unavailable",
        }
    }
}

/// Top-of-book L2 depth, best levels first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct L2Snapshot {
    /// `(price, size)` levels, best bid first.
    pub bids: Vec<(f64, f64)>,
    /// `(price, size)` levels, best ask first.
    pub asks: Vec<(f64, f64)>,
}

/// Normalised last-known market state for one `(venue, instrument)` pair.
///
/// `mid`, `spread` and `spread_bps` are recomputed by the market-data
/// service on every update; adapters only supply raw bid/ask/last.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub venue: String,
    pub instrument: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub mid: f64,
    pub spread: f64,
    pub spread_bps: f64,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub volume_24h: Option<f64>,
    /// Short-horizon realised volatility estimate, when a feed provides one.
    pub volatility_bps: Option<f64>,
    pub event_time: DateTime<Utc>,
    pub receive_time: DateTime<Utc>,
    pub data_quality: DataQuality,
    pub l2: Option<L2Snapshot>,
}

impl MarketSnapshot {
    /// Build a snapshot from raw quote fields, deriving mid/spread/spread_bps.
    #[allow(clippy::too_many_arguments)]
    pub fn from_quote(
        venue: impl Into<String>,
        instrument: impl Into<String>,
        bid: f64,
        ask: f64,
        last: f64,
        event_time: DateTime<Utc>,
        receive_time: DateTime<Utc>,
        data_quality: DataQuality,
    ) -> Self {
        let mid = (bid + ask) / 2.0;
        let spread = ask - bid;
        let spread_bps = if bid + ask > 0.0 {
            spread / mid * 10_000.0
        } else {
            0.0
        };
        Self {
            venue: venue.into(),
            instrument: instrument.into(),
            bid,
            ask,
            last,
            mid,
            spread,
            spread_bps,
            bid_size: None,
            ask_size: None,
            volume_24h: None,
            volatility_bps: None,
            event_time,
            receive_time,
            data_quality,
            l2: None,
        }
    }

    /// Sentinel snapshot for a pair with no data. Downstream gates reject
    /// these outright.
    pub fn unavailable(venue: impl Into<String>, instrument: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::from_quote(venue, instrument, 0.0, 0.0, 0.0, now, now, DataQuality::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_mid_spread_and_bps() {
        let now = Utc::now();
        let s = MarketSnapshot::from_quote(
            "coinbase",
            "BTC-USD",
            100.0,
            101.0,
            100.5,
            now,
            now,
            DataQuality::Realtime,
        );
        assert_eq!(s.mid, 100.5);
        assert_eq!(s.spread, 1.0);
        assert!((s.spread_bps - 99.502).abs() < 0.01);
    }

    #[test]
    fn zero_quote_has_zero_spread_bps() {
        let s = MarketSnapshot::unavailable("coinbase", "BTC-USD");
        assert_eq!(s.spread_bps, 0.0);
        assert_eq!(s.data_quality, DataQuality::Unavailable);
    }
}
