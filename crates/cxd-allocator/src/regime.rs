//! Market regime detection for the allocator.
//!
//! Classifies direction, volatility and liquidity from a rolling window of
//! BTC prices plus current book depth, and derives a risk bias. Snapshots
//! persist to `market_regimes` for the decision audit trail.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use cxd_marketdata::MarketDataService;
use cxd_store::{RegimeRow, Store, StoreResult};

const MAX_SAMPLES: usize = 60;
const MIN_SAMPLES: usize = 10;

const TREND_THRESHOLD: f64 = 0.02;
const HIGH_VOL_THRESHOLD: f64 = 0.02;
const LOW_VOL_THRESHOLD: f64 = 0.005;
const DEEP_LIQUIDITY_SIZE: f64 = 10.0;
const THIN_LIQUIDITY_SIZE: f64 = 1.0;

/// The detected regime, all axes as lowercase labels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    /// `trending_up | trending_down | range_bound`
    pub direction: String,
    /// `high_vol | medium_vol | low_vol`
    pub volatility: String,
    /// `deep_liquidity | normal | thin`
    pub liquidity: String,
    /// `risk_on | risk_off | neutral`
    pub risk_bias: String,
    pub details: serde_json::Value,
}

/// Rolling-window regime detector anchored on BTC.
pub struct RegimeDetector {
    store: Arc<dyn Store>,
    marketdata: MarketDataService,
    tenant_id: String,
    prices: Mutex<VecDeque<f64>>,
}

impl RegimeDetector {
    pub fn new(
        store: Arc<dyn Store>,
        marketdata: MarketDataService,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            marketdata,
            tenant_id: tenant_id.into(),
            prices: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    /// Sample the market and classify. The result is persisted best-effort.
    pub async fn detect(&self, venue: &str) -> StoreResult<RegimeState> {
        let snapshot = self.marketdata.get_price(venue, "BTC-USD").await;
        let price = snapshot.as_ref().map(|s| {
            if s.last > 0.0 {
                s.last
            } else {
                s.mid
            }
        });

        let (direction, volatility) = {
            let mut window = self.prices.lock().await;
            if let Some(p) = price {
                if p > 0.0 {
                    if window.len() == MAX_SAMPLES {
                        window.pop_front();
                    }
                    window.push_back(p);
                }
            }
            let series: Vec<f64> = window.iter().copied().collect();
            (directional_regime(&series), volatility_regime(&series))
        };

        let liquidity = liquidity_regime(
            snapshot.as_ref().and_then(|s| s.bid_size),
            snapshot.as_ref().and_then(|s| s.ask_size),
        );
        let risk_bias = risk_bias(&direction, &volatility, &liquidity);

        let state = RegimeState {
            direction,
            volatility,
            liquidity,
            risk_bias,
            details: serde_json::json!({ "btc_price": price }),
        };

        if let Err(e) = self
            .store
            .record_regime(&RegimeRow {
                tenant_id: self.tenant_id.clone(),
                direction: state.direction.clone(),
                volatility: state.volatility.clone(),
                liquidity: state.liquidity.clone(),
                risk_bias: state.risk_bias.clone(),
                details: state.details.clone(),
                ts: Utc::now(),
            })
            .await
        {
            warn!(error = %e, "regime_store_failed");
        }

        Ok(state)
    }
}

fn directional_regime(series: &[f64]) -> String {
    if series.len() < MIN_SAMPLES {
        return "range_bound".to_string();
    }
    let start = series[0];
    let end = series[series.len() - 1];
    if start <= 0.0 {
        return "range_bound".to_string();
    }
    let change = (end - start) / start;
    if change > TREND_THRESHOLD {
        "trending_up".to_string()
    } else if change < -TREND_THRESHOLD {
        "trending_down".to_string()
    } else {
        "range_bound".to_string()
    }
}

fn volatility_regime(series: &[f64]) -> String {
    if series.len() < MIN_SAMPLES {
        return "medium_vol".to_string();
    }
    let returns: Vec<f64> = series
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return "medium_vol".to_string();
    }
    let rms = (returns.iter().map(|r| r * r).sum::<f64>() / returns.len() as f64).sqrt();
    if rms > HIGH_VOL_THRESHOLD {
        "high_vol".to_string()
    } else if rms < LOW_VOL_THRESHOLD {
        "low_vol".to_string()
    } else {
        "medium_vol".to_string()
    }
}

fn liquidity_regime(bid_size: Option<f64>, ask_size: Option<f64>) -> String {
    match (bid_size, ask_size) {
        (Some(b), Some(a)) => {
            let depth = (b + a) / 2.0;
            if depth > DEEP_LIQUIDITY_SIZE {
                "deep_liquidity".to_string()
            } else if depth < THIN_LIQUIDITY_SIZE {
                "thin".to_string()
            } else {
                "normal".to_string()
            }
        }
        _ => "normal".to_string(),
    }
}

fn risk_bias(direction: &str, volatility: &str, liquidity: &str) -> String {
    if volatility == "high_vol" || liquidity == "thin" {
        return "risk_off".to_string();
    }
    if matches!(direction, "trending_up" | "trending_down") && volatility != "high_vol" {
        return "risk_on".to_string();
    }
    "neutral".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxd_marketdata::{NoopPublisher, QuoteUpdate};
    use cxd_store::MemStore;

    #[test]
    fn short_window_defaults_are_neutral() {
        assert_eq!(directional_regime(&[100.0; 5]), "range_bound");
        assert_eq!(volatility_regime(&[100.0; 5]), "medium_vol");
    }

    #[test]
    fn trend_classification_uses_two_percent() {
        let up: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.2).collect();
        assert_eq!(directional_regime(&up), "trending_up");
        let down: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.2).collect();
        assert_eq!(directional_regime(&down), "trending_down");
        let flat = vec![100.0; 20];
        assert_eq!(directional_regime(&flat), "range_bound");
    }

    #[test]
    fn volatile_series_is_high_vol_and_risk_off() {
        let wild: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 100.0 } else { 104.0 })
            .collect();
        let vol = volatility_regime(&wild);
        assert_eq!(vol, "high_vol");
        assert_eq!(risk_bias("trending_up", &vol, "normal"), "risk_off");
    }

    #[test]
    fn calm_trend_is_risk_on() {
        assert_eq!(risk_bias("trending_up", "low_vol", "normal"), "risk_on");
        assert_eq!(risk_bias("range_bound", "low_vol", "normal"), "neutral");
        assert_eq!(risk_bias("range_bound", "low_vol", "thin"), "risk_off");
    }

    #[tokio::test]
    async fn detect_persists_a_regime_row() {
        let store = Arc::new(MemStore::new());
        let md = MarketDataService::new(Arc::new(NoopPublisher));
        md.update_quote(QuoteUpdate::new("coinbase", "BTC-USD", 100.0, 100.2, 100.1))
            .await;

        let detector = RegimeDetector::new(store.clone(), md, "t1");
        let state = detector.detect("coinbase").await.unwrap();
        assert_eq!(state.direction, "range_bound");
        assert!(!state.risk_bias.is_empty());
    }
}
