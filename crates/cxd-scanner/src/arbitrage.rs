//! Arbitrage engine: cross-venue spreads and spot-vs-perp basis.
//!
//! Cross-venue: for every ordered (buy, sell) venue pair,
//! `profit_bps = (sell_bid - buy_ask) / buy_ask * 10_000`; emits a two-leg
//! legged plan whose sizes the OMS fills in. Basis:
//! `basis_bps = (perp_mid - spot_mid) / spot_mid * 10_000`, buy when
//! positive, sell when negative.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use cxd_domain::{
    DataQuality, ExecutionLeg, ExecutionPlan, MarketSnapshot, Opportunity, OpportunityType, Side,
};
use cxd_marketdata::MarketDataService;

const CROSS_VENUE_HORIZON_MINUTES: i64 = 5;
const BASIS_HORIZON_MINUTES: i64 = 60;
/// Spread that maps to full confidence, bps.
const FULL_CONFIDENCE_BPS: f64 = 50.0;

pub struct ArbitrageEngine {
    marketdata: MarketDataService,
}

impl ArbitrageEngine {
    pub fn new(marketdata: MarketDataService) -> Self {
        Self { marketdata }
    }

    /// Scan every ordered venue pair for a crossable spread.
    pub async fn scan_cross_venue(
        &self,
        instrument: &str,
        venues: &[String],
        min_profit_bps: f64,
    ) -> Vec<Opportunity> {
        let mut out = Vec::new();
        if venues.len() < 2 {
            return out;
        }

        let quotes = self.usable_quotes(instrument, venues).await;

        for buy_venue in venues {
            for sell_venue in venues {
                if buy_venue == sell_venue {
                    continue;
                }
                let (Some(buy_quote), Some(sell_quote)) = (
                    quotes.iter().find(|q| q.venue.eq_ignore_ascii_case(buy_venue)),
                    quotes
                        .iter()
                        .find(|q| q.venue.eq_ignore_ascii_case(sell_venue)),
                ) else {
                    continue;
                };
                if buy_quote.ask <= 0.0 || sell_quote.bid <= 0.0 {
                    continue;
                }

                let profit_bps = (sell_quote.bid - buy_quote.ask) / buy_quote.ask * 10_000.0;
                if profit_bps < min_profit_bps {
                    continue;
                }

                let plan = ExecutionPlan::legged(vec![
                    ExecutionLeg::market(buy_venue.clone(), instrument, Side::Buy)
                        .with_max_slippage_bps(ExecutionPlan::DEFAULT_MAX_LEG_SLIPPAGE_BPS),
                    ExecutionLeg::market(sell_venue.clone(), instrument, Side::Sell)
                        .with_max_slippage_bps(ExecutionPlan::DEFAULT_MAX_LEG_SLIPPAGE_BPS),
                ]);

                debug!(instrument, buy_venue = %buy_venue, sell_venue = %sell_venue, profit_bps, "cross_venue_spread");
                out.push(Opportunity {
                    id: Uuid::new_v4(),
                    opportunity_type: OpportunityType::Arbitrage,
                    instrument: instrument.to_string(),
                    direction: Side::Buy,
                    venue: buy_venue.clone(),
                    confidence: (profit_bps / FULL_CONFIDENCE_BPS).min(1.0),
                    expected_edge_bps: profit_bps,
                    horizon_minutes: CROSS_VENUE_HORIZON_MINUTES,
                    data_quality: buy_quote.data_quality,
                    signal_stack: None,
                    execution_plan: Some(plan),
                    explanation: format!(
                        "cross-venue spread {profit_bps:.1} bps ({buy_venue} -> {sell_venue})"
                    ),
                    strategy_name: None,
                    created_at: Utc::now(),
                });
            }
        }
        out
    }

    /// Scan spot-vs-perp basis per venue.
    pub async fn scan_basis(
        &self,
        spot_instrument: &str,
        perp_instrument: &str,
        venues: &[String],
        min_profit_bps: f64,
    ) -> Vec<Opportunity> {
        let mut out = Vec::new();

        for venue in venues {
            let (Some(spot), Some(perp)) = (
                self.marketdata.get_price(venue, spot_instrument).await,
                self.marketdata.get_price(venue, perp_instrument).await,
            ) else {
                continue;
            };
            if spot.data_quality == DataQuality::Unavailable
                || perp.data_quality == DataQuality::Unavailable
            {
                continue;
            }
            if spot.mid <= 0.0 || perp.mid <= 0.0 {
                continue;
            }

            let basis_bps = (perp.mid - spot.mid) / spot.mid * 10_000.0;
            if basis_bps.abs() < min_profit_bps {
                continue;
            }

            let direction = if basis_bps > 0.0 { Side::Buy } else { Side::Sell };
            debug!(venue = %venue, basis_bps, "basis_spread");
            out.push(Opportunity {
                id: Uuid::new_v4(),
                opportunity_type: OpportunityType::Arbitrage,
                instrument: spot_instrument.to_string(),
                direction,
                venue: venue.clone(),
                confidence: (basis_bps.abs() / FULL_CONFIDENCE_BPS).min(1.0),
                expected_edge_bps: basis_bps.abs(),
                horizon_minutes: BASIS_HORIZON_MINUTES,
                data_quality: spot.data_quality,
                signal_stack: None,
                execution_plan: None,
                explanation: format!(
                    "basis {basis_bps:.1} bps between {spot_instrument} and {perp_instrument}"
                ),
                strategy_name: None,
                created_at: Utc::now(),
            });
        }
        out
    }

    async fn usable_quotes(&self, instrument: &str, venues: &[String]) -> Vec<MarketSnapshot> {
        let mut quotes = Vec::new();
        for venue in venues {
            if let Some(q) = self.marketdata.get_price(venue, instrument).await {
                if q.data_quality != DataQuality::Unavailable {
                    quotes.push(q);
                }
            }
        }
        quotes
    }
}
