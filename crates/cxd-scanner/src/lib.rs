//! Opportunity scanner: multi-timeframe directional screening plus the
//! arbitrage engine, ranked into trade intents.
//!
//! One opportunity at most per (strategy, instrument). Ranking is
//! `expected_edge_bps * confidence` descending, truncated to the scanner's
//! `max_opportunities`; `generate_intents` converts the top-K into
//! [`TradeIntent`]s sized off the owning book.

pub mod arbitrage;
pub mod signal;

pub use arbitrage::ArbitrageEngine;
pub use signal::{trend_signal, TrendSignal};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use cxd_config::{StrategyDefinition, StrategyType};
use cxd_domain::{
    Book, DataQuality, IntentMeta, MetaEntry, Opportunity, OpportunityType, Side, SignalStack,
    TradeIntent, TrendDirection,
};
use cxd_marketdata::MarketDataService;
use cxd_strategy::StrategyRegistry;

/// Bar counts requested per timeframe, fast to slow.
const FAST_LIMIT: usize = 50;
const MEDIUM_LIMIT: usize = 80;
const SLOW_LIMIT: usize = 120;

/// Historical close source for the directional scanner. Live runs back this
/// with venue candles; tests use canned series.
#[async_trait]
pub trait OhlcvSource: Send + Sync {
    /// Most recent `limit` closes for `(instrument, timeframe)`, oldest
    /// first. `None` when the series is unavailable.
    async fn fetch_closes(
        &self,
        instrument: &str,
        timeframe: &str,
        limit: usize,
    ) -> Option<Vec<f64>>;
}

/// The scanner over the strategy registry, market data and close history.
pub struct OpportunityScanner {
    registry: Arc<StrategyRegistry>,
    marketdata: MarketDataService,
    ohlcv: Arc<dyn OhlcvSource>,
    arbitrage: ArbitrageEngine,
}

impl OpportunityScanner {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        marketdata: MarketDataService,
        ohlcv: Arc<dyn OhlcvSource>,
    ) -> Self {
        let arbitrage = ArbitrageEngine::new(marketdata.clone());
        Self {
            registry,
            marketdata,
            ohlcv,
            arbitrage,
        }
    }

    /// Produce the ranked opportunity list across all enabled strategies.
    pub async fn scan(&self) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for strategy in self.registry.enabled() {
            match strategy.strategy_type {
                StrategyType::Spot | StrategyType::Futures => {
                    opportunities.extend(self.scan_directional(&strategy).await);
                }
                StrategyType::Arbitrage => {
                    opportunities.extend(self.scan_arbitrage(&strategy).await);
                }
                StrategyType::Execution => {}
            }
        }

        opportunities.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        opportunities.truncate(self.registry.scanner_config().max_opportunities);
        opportunities
    }

    /// Convert the top-K opportunities into sized trade intents.
    pub async fn generate_intents(&self, books: &[Book]) -> Vec<TradeIntent> {
        let opportunities = self.scan().await;
        let top_k = self.registry.scanner_config().top_k;
        let mut intents = Vec::new();

        for opportunity in opportunities.into_iter().take(top_k) {
            let Some(strategy) = self.strategy_for(&opportunity) else {
                continue;
            };
            let Some(book) = select_book(&strategy, books) else {
                continue;
            };
            intents.push(convert_to_intent(&opportunity, &strategy, book));
        }
        intents
    }

    async fn scan_directional(&self, strategy: &StrategyDefinition) -> Vec<Opportunity> {
        let Some(timeframes) = &strategy.timeframes else {
            return Vec::new();
        };
        let mut out = Vec::new();

        for instrument in &strategy.universe {
            let Some(stack) = self.build_signal_stack(instrument, strategy).await else {
                continue;
            };
            if stack.confidence < strategy.min_confidence {
                continue;
            }
            if let Some(min_edge) = strategy.min_edge_bps {
                if stack.expected_edge_bps < min_edge {
                    continue;
                }
            }

            let venue = strategy
                .venue_routing
                .first()
                .cloned()
                .unwrap_or_else(|| "coinbase".to_string());
            let data_quality = match self.marketdata.get_price(&venue, instrument).await {
                Some(snapshot) => snapshot.data_quality,
                None => DataQuality::Unavailable,
            };

            let direction = match stack.fast_direction {
                TrendDirection::Bullish => Side::Buy,
                _ => Side::Sell,
            };
            let opportunity_type = if strategy.strategy_type == StrategyType::Futures {
                OpportunityType::Futures
            } else {
                OpportunityType::Spot
            };

            debug!(
                instrument = %instrument,
                confidence = stack.confidence,
                edge_bps = stack.expected_edge_bps,
                "directional_opportunity"
            );
            out.push(Opportunity {
                id: Uuid::new_v4(),
                opportunity_type,
                instrument: instrument.clone(),
                direction,
                venue,
                confidence: stack.confidence,
                expected_edge_bps: stack.expected_edge_bps,
                horizon_minutes: strategy.expected_holding_minutes,
                data_quality,
                explanation: format!(
                    "aligned trend across {}/{}/{}",
                    timeframes.fast, timeframes.medium, timeframes.slow
                ),
                signal_stack: Some(stack),
                execution_plan: None,
                strategy_name: Some(strategy.name.clone()),
                created_at: Utc::now(),
            });
        }
        out
    }

    async fn scan_arbitrage(&self, strategy: &StrategyDefinition) -> Vec<Opportunity> {
        let venues: Vec<String> = if strategy.venue_routing.is_empty() {
            vec!["coinbase".to_string()]
        } else {
            strategy.venue_routing.clone()
        };

        let mut out = Vec::new();
        for instrument in &strategy.universe {
            // `SPOT|PERP` pairs scan the basis; plain symbols scan
            // cross-venue spreads.
            let mut opportunities = if let Some((spot, perp)) = instrument.split_once('|') {
                self.arbitrage
                    .scan_basis(spot, perp, &venues, strategy.min_edge_bps.unwrap_or(8.0))
                    .await
            } else {
                self.arbitrage
                    .scan_cross_venue(instrument, &venues, strategy.min_edge_bps.unwrap_or(5.0))
                    .await
            };
            for opp in &mut opportunities {
                opp.strategy_name = Some(strategy.name.clone());
            }
            out.extend(opportunities);
        }
        out
    }

    /// Require the fast/medium/slow trends to agree and be non-neutral.
    async fn build_signal_stack(
        &self,
        instrument: &str,
        strategy: &StrategyDefinition,
    ) -> Option<SignalStack> {
        let timeframes = strategy.timeframes.as_ref()?;

        let fast = self
            .ohlcv
            .fetch_closes(instrument, &timeframes.fast, FAST_LIMIT)
            .await?;
        let medium = self
            .ohlcv
            .fetch_closes(instrument, &timeframes.medium, MEDIUM_LIMIT)
            .await?;
        let slow = self
            .ohlcv
            .fetch_closes(instrument, &timeframes.slow, SLOW_LIMIT)
            .await?;

        let fast_signal = trend_signal(&fast);
        let medium_signal = trend_signal(&medium);
        let slow_signal = trend_signal(&slow);

        let directions = [
            fast_signal.direction,
            medium_signal.direction,
            slow_signal.direction,
        ];
        if directions.contains(&TrendDirection::Neutral) {
            return None;
        }
        if directions.iter().any(|d| *d != directions[0]) {
            return None;
        }

        let confidence = ((fast_signal.confidence
            + medium_signal.confidence
            + slow_signal.confidence)
            / 3.0)
            .min(1.0);
        let expected_edge_bps = (fast_signal.strength_bps
            + medium_signal.strength_bps
            + slow_signal.strength_bps)
            / 3.0;

        Some(SignalStack {
            fast_timeframe: timeframes.fast.clone(),
            medium_timeframe: timeframes.medium.clone(),
            slow_timeframe: timeframes.slow.clone(),
            fast_direction: fast_signal.direction,
            medium_direction: medium_signal.direction,
            slow_direction: slow_signal.direction,
            confidence,
            expected_edge_bps,
            explanation: format!(
                "aligned trend across {}/{}/{}",
                timeframes.fast, timeframes.medium, timeframes.slow
            ),
        })
    }

    fn strategy_for(&self, opportunity: &Opportunity) -> Option<StrategyDefinition> {
        if let Some(name) = &opportunity.strategy_name {
            if let Some(def) = self.registry.get(name) {
                return Some(def);
            }
        }
        // Fall back to the first enabled strategy of the matching type.
        self.registry
            .enabled()
            .into_iter()
            .find(|s| s.strategy_type.as_str() == opportunity.opportunity_type.as_str())
    }
}

/// Book selection: explicit book id, then book type, then the first book.
fn select_book<'a>(strategy: &StrategyDefinition, books: &'a [Book]) -> Option<&'a Book> {
    if let Some(book_id) = strategy.book_id {
        return books.iter().find(|b| b.id == book_id);
    }
    if let Some(book_type) = &strategy.book_type {
        return books
            .iter()
            .find(|b| b.book_type.eq_ignore_ascii_case(book_type));
    }
    books.first()
}

fn convert_to_intent(
    opportunity: &Opportunity,
    strategy: &StrategyDefinition,
    book: &Book,
) -> TradeIntent {
    let target_exposure = book.capital_allocated * strategy.max_risk_per_trade;
    let max_loss = target_exposure * 0.02;

    let mut meta = IntentMeta::new()
        .with(MetaEntry::ExpectedEdge {
            edge_bps: opportunity.expected_edge_bps,
        })
        .with(MetaEntry::Strategy {
            name: strategy.name.clone(),
            strategy_type: strategy.strategy_type.as_str().to_string(),
        });
    if let Some(plan) = &opportunity.execution_plan {
        meta.push(MetaEntry::Plan(plan.clone()));
    }

    let mut intent = TradeIntent::new(
        book.id,
        strategy.effective_id(),
        opportunity.instrument.clone(),
        opportunity.direction,
        target_exposure,
        max_loss,
        opportunity.horizon_minutes,
        opportunity.confidence,
    );
    intent.meta = meta;
    intent
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxd_config::{ScannerConfig, StrategyConfigDoc, StrategyTimeframes};
    use cxd_marketdata::{NoopPublisher, QuoteUpdate};
    use std::collections::BTreeMap;

    struct CannedCloses {
        series: BTreeMap<(String, String), Vec<f64>>,
    }

    #[async_trait]
    impl OhlcvSource for CannedCloses {
        async fn fetch_closes(
            &self,
            instrument: &str,
            timeframe: &str,
            limit: usize,
        ) -> Option<Vec<f64>> {
            self.series
                .get(&(instrument.to_string(), timeframe.to_string()))
                .map(|v| {
                    let start = v.len().saturating_sub(limit);
                    v[start..].to_vec()
                })
        }
    }

    fn directional_strategy(min_confidence: f64) -> StrategyDefinition {
        StrategyDefinition {
            id: None,
            name: "btc-trend".to_string(),
            strategy_type: StrategyType::Spot,
            universe: vec!["BTC-USD".to_string()],
            timeframes: Some(StrategyTimeframes {
                fast: "5m".into(),
                medium: "1h".into(),
                slow: "4h".into(),
            }),
            min_confidence,
            max_risk_per_trade: 0.01,
            expected_holding_minutes: 60,
            venue_routing: vec!["coinbase".to_string()],
            book_type: None,
            book_id: None,
            min_edge_bps: None,
            parameters: serde_json::Value::Null,
            enabled: true,
        }
    }

    /// Closes trending up ~1% above their SMA10.
    fn bullish_closes() -> Vec<f64> {
        (0..40).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    fn scanner_with(
        strategies: Vec<StrategyDefinition>,
        series: BTreeMap<(String, String), Vec<f64>>,
    ) -> (OpportunityScanner, MarketDataService) {
        let registry = Arc::new(StrategyRegistry::from_doc(StrategyConfigDoc {
            scanner: ScannerConfig {
                top_k: 3,
                max_opportunities: 10,
            },
            strategies,
        }));
        let marketdata = MarketDataService::new(Arc::new(NoopPublisher));
        let scanner = OpportunityScanner::new(
            registry,
            marketdata.clone(),
            Arc::new(CannedCloses { series }),
        );
        (scanner, marketdata)
    }

    fn aligned_series() -> BTreeMap<(String, String), Vec<f64>> {
        let mut series = BTreeMap::new();
        for tf in ["5m", "1h", "4h"] {
            series.insert(("BTC-USD".to_string(), tf.to_string()), bullish_closes());
        }
        series
    }

    #[tokio::test]
    async fn aligned_stack_emits_buy_opportunity() {
        let (scanner, marketdata) = scanner_with(vec![directional_strategy(0.1)], aligned_series());
        marketdata
            .update_quote(QuoteUpdate::new("coinbase", "BTC-USD", 119.0, 119.2, 119.1))
            .await;

        let opportunities = scanner.scan().await;
        assert_eq!(opportunities.len(), 1);
        let opp = &opportunities[0];
        assert_eq!(opp.direction, Side::Buy);
        assert_eq!(opp.opportunity_type, OpportunityType::Spot);
        assert!(opp.expected_edge_bps > 0.0);
        assert_eq!(opp.data_quality, DataQuality::Realtime);
        let stack = opp.signal_stack.as_ref().unwrap();
        assert_eq!(stack.fast_direction, TrendDirection::Bullish);
    }

    #[tokio::test]
    async fn misaligned_frames_emit_nothing() {
        let mut series = aligned_series();
        // Slow frame trends down instead.
        series.insert(
            ("BTC-USD".to_string(), "4h".to_string()),
            (0..40).map(|i| 100.0 - i as f64 * 0.5).collect(),
        );
        let (scanner, _) = scanner_with(vec![directional_strategy(0.1)], series);
        assert!(scanner.scan().await.is_empty());
    }

    #[tokio::test]
    async fn too_few_samples_emit_nothing() {
        let mut series = BTreeMap::new();
        for tf in ["5m", "1h", "4h"] {
            series.insert(
                ("BTC-USD".to_string(), tf.to_string()),
                vec![100.0, 101.0, 102.0], // < 10 closes
            );
        }
        let (scanner, _) = scanner_with(vec![directional_strategy(0.1)], series);
        assert!(scanner.scan().await.is_empty());
    }

    #[tokio::test]
    async fn min_confidence_filters_weak_stacks() {
        let (scanner, _) = scanner_with(vec![directional_strategy(0.99)], aligned_series());
        // The synthetic trend's confidence is well below 0.99.
        assert!(scanner.scan().await.is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_tags_unavailable() {
        let (scanner, _) = scanner_with(vec![directional_strategy(0.1)], aligned_series());
        let opportunities = scanner.scan().await;
        assert_eq!(opportunities[0].data_quality, DataQuality::Unavailable);
    }

    #[tokio::test]
    async fn intents_are_sized_from_the_book() {
        let (scanner, marketdata) = scanner_with(vec![directional_strategy(0.1)], aligned_series());
        marketdata
            .update_quote(QuoteUpdate::new("coinbase", "BTC-USD", 119.0, 119.2, 119.1))
            .await;

        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        let intents = scanner.generate_intents(&[book.clone()]).await;
        assert_eq!(intents.len(), 1);
        let intent = &intents[0];
        assert_eq!(intent.book_id, book.id);
        assert_eq!(intent.target_exposure_usd, 1_000.0);
        assert_eq!(intent.max_loss_usd, 20.0);
        assert!(intent.meta.expected_edge_bps().unwrap() > 0.0);
        assert_eq!(intent.meta.strategy_name(), Some("btc-trend"));
    }
}
