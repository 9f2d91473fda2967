//! The typed `Services` handle: every dependency the engine's moving parts
//! need, constructed once and passed explicitly.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use cxd_allocator::{CapitalAllocator, RegimeDetector};
use cxd_config::{AllocatorConfig, EngineConfig, StrategyConfigDoc, VenueMode};
use cxd_domain::Book;
use cxd_edge::{EdgeCostModel, VenueFees};
use cxd_execution::{Oms, OmsConfig};
use cxd_marketdata::{MarketDataService, NoopPublisher, QuotePublisher};
use cxd_portfolio::PortfolioEngine;
use cxd_reconcile::{ReconcileConfig, ReconciliationService};
use cxd_risk::{CircuitBreakers, RiskConfig, RiskEngine};
use cxd_scanner::OpportunityScanner;
use cxd_store::{MemStore, Store, VenueRow};
use cxd_strategy::StrategyRegistry;
use cxd_venue_coinbase::{CoinbaseVenue, Credentials};
use cxd_venue_paper::PaperVenue;
use cxd_venues::{VenueAdapter, VenueRegistry};

use crate::candles::CandleBuffer;

/// Explicit dependency carrier. The supervisor constructs and owns one; the
/// loops and the CLI borrow it.
pub struct Services {
    pub engine_config: EngineConfig,
    pub store: Arc<dyn Store>,
    pub marketdata: MarketDataService,
    pub venues: VenueRegistry,
    pub strategies: Arc<StrategyRegistry>,
    pub candles: Arc<CandleBuffer>,
    pub scanner: Arc<OpportunityScanner>,
    pub risk: RiskEngine,
    pub breakers: Arc<CircuitBreakers>,
    pub portfolio: PortfolioEngine,
    pub oms: Arc<Oms>,
    pub recon: Arc<ReconciliationService>,
    pub allocator: Arc<CapitalAllocator>,
    pub regime: Arc<RegimeDetector>,
    /// Venue used for regime anchoring and default routing.
    pub primary_venue: String,
}

/// Build a fully wired service graph.
///
/// Adapters are constructed per the engine config: paper venues simulate,
/// live venues read credentials from the configured env vars. The process
/// refuses to start live trading on a bad config — errors here are fatal.
pub async fn build_services(
    engine_config: EngineConfig,
    strategy_doc: StrategyConfigDoc,
    allocator_config: AllocatorConfig,
    store: Arc<dyn Store>,
    publisher: Arc<dyn QuotePublisher>,
) -> Result<Arc<Services>> {
    let marketdata = MarketDataService::with_stale_threshold(
        publisher,
        std::time::Duration::from_secs(engine_config.stale_threshold_secs.max(1) as u64),
    );

    // Venue adapters + store rows + fee tables.
    let mut venues = VenueRegistry::new();
    let mut venue_fees: BTreeMap<String, VenueFees> = BTreeMap::new();
    for venue_config in &engine_config.venues {
        let adapter: Arc<dyn VenueAdapter> = match venue_config.mode {
            VenueMode::Paper => Arc::new(PaperVenue::new(venue_config.name.clone())),
            VenueMode::Live => {
                let key_var = venue_config
                    .api_key_env
                    .as_deref()
                    .context("live venue missing api_key_env")?;
                let secret_var = venue_config
                    .api_secret_env
                    .as_deref()
                    .context("live venue missing api_secret_env")?;
                let creds = Credentials::from_env(key_var, secret_var)
                    .map_err(|e| anyhow::anyhow!("credentials for {}: {e}", venue_config.name))?;
                Arc::new(CoinbaseVenue::new(creds))
            }
        };
        adapter
            .connect()
            .await
            .map_err(|e| anyhow::anyhow!("connect {}: {e}", venue_config.name))?;

        let mut row = VenueRow::new(venue_config.name.clone(), venue_config.venue_type.clone());
        row.supported_instruments = venue_config.supported_instruments.clone();
        store.upsert_venue(&row).await?;

        venue_fees.insert(
            venue_config.name.to_lowercase(),
            VenueFees {
                maker_bps: venue_config.fees.maker_bps,
                taker_bps: venue_config.fees.taker_bps,
            },
        );
        venues.register(adapter);
        info!(venue = %venue_config.name, mode = ?venue_config.mode, "venue_registered");
    }

    let primary_venue = engine_config
        .venues
        .first()
        .map(|v| v.name.to_lowercase())
        .context("at least one venue required")?;

    let strategies = Arc::new(StrategyRegistry::from_doc(strategy_doc));
    let candles = Arc::new(CandleBuffer::new());
    let scanner = Arc::new(OpportunityScanner::new(
        Arc::clone(&strategies),
        marketdata.clone(),
        Arc::clone(&candles) as Arc<dyn cxd_scanner::OhlcvSource>,
    ));

    let breakers = Arc::new(CircuitBreakers::new());
    let risk = RiskEngine::new(
        Arc::clone(&store),
        Arc::clone(&breakers),
        RiskConfig::default(),
    );
    let portfolio = PortfolioEngine::new(Arc::clone(&store));

    let oms = Arc::new(Oms::new(
        Arc::clone(&store),
        venues.clone(),
        marketdata.clone(),
        risk.clone(),
        portfolio.clone(),
        EdgeCostModel::new(engine_config.min_edge_buffer_bps),
        OmsConfig {
            tenant_id: engine_config.tenant_id.clone(),
            tick: 1e-6,
            venue_fees,
            default_max_risk_per_trade: 0.01,
        },
    ));
    // Teach the OMS each strategy's per-trade risk limit, and mirror the
    // definitions into the strategies table so the allocator can see them.
    // Runtime registrations are mirrored the same way, best-effort, when
    // they happen.
    for def in strategies.all() {
        oms.set_strategy_risk_limit(def.effective_id(), def.max_risk_per_trade);
        store
            .upsert_strategy(&cxd_store::StrategyRow {
                id: def.effective_id(),
                tenant_id: engine_config.tenant_id.clone(),
                name: def.name.clone(),
                strategy_type: def.strategy_type.as_str().to_string(),
                enabled: def.enabled,
                max_notional: 0.0,
                min_notional: 0.0,
                capacity_estimate: 0.0,
                book_id: def.book_id,
                parameters: def.parameters.clone(),
                created_at: chrono::Utc::now(),
            })
            .await?;
    }

    let recon = Arc::new(ReconciliationService::new(
        Arc::clone(&store),
        venues.clone(),
        risk.clone(),
        Arc::clone(&oms),
        ReconcileConfig {
            interval_secs: engine_config.recon_interval_secs,
            hedge_ratio_band: engine_config.hedge_ratio_band,
            ..ReconcileConfig::default()
        },
        engine_config.tenant_id.clone(),
    ));

    let watched: Vec<String> = engine_config
        .venues
        .iter()
        .map(|v| v.name.to_lowercase())
        .collect();
    let allocator = Arc::new(CapitalAllocator::new(
        Arc::clone(&store),
        marketdata.clone(),
        Arc::clone(&breakers),
        allocator_config,
        engine_config.tenant_id.clone(),
        watched,
    ));
    let regime = Arc::new(RegimeDetector::new(
        Arc::clone(&store),
        marketdata.clone(),
        engine_config.tenant_id.clone(),
    ));

    Ok(Arc::new(Services {
        engine_config,
        store,
        marketdata,
        venues,
        strategies,
        candles,
        scanner,
        risk,
        breakers,
        portfolio,
        oms,
        recon,
        allocator,
        regime,
        primary_venue,
    }))
}

/// Convenience: an all-paper service graph over the in-memory store, with a
/// default book. Used by the CLI's paper mode and by integration tests.
pub async fn build_paper_services(
    engine_config: EngineConfig,
    strategy_doc: StrategyConfigDoc,
    allocator_config: AllocatorConfig,
) -> Result<Arc<Services>> {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let services = build_services(
        engine_config,
        strategy_doc,
        allocator_config,
        Arc::clone(&store),
        Arc::new(NoopPublisher),
    )
    .await?;

    let book = Book::new(
        "paper",
        "alpha",
        services.engine_config.total_capital_usd,
        services.engine_config.total_capital_usd,
    );
    services.store.upsert_book(&book).await?;
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxd_config::{FeeSchedule, ScannerConfig, VenueConfig};

    fn engine_config() -> EngineConfig {
        EngineConfig {
            tenant_id: "desk-1".to_string(),
            venues: vec![VenueConfig {
                name: "coinbase".to_string(),
                venue_type: "spot".to_string(),
                mode: VenueMode::Paper,
                fees: FeeSchedule::default(),
                supported_instruments: vec!["BTC-USD".to_string()],
                api_key_env: None,
                api_secret_env: None,
            }],
            stale_threshold_secs: 30,
            min_edge_buffer_bps: 10.0,
            recon_interval_secs: 60,
            hedge_ratio_band: (0.98, 1.02),
            total_capital_usd: 100_000.0,
        }
    }

    #[tokio::test]
    async fn paper_graph_wires_and_seeds_a_book() {
        let services = build_paper_services(
            engine_config(),
            StrategyConfigDoc {
                scanner: ScannerConfig::default(),
                strategies: vec![],
            },
            AllocatorConfig {
                base_weights: std::collections::BTreeMap::from([(
                    "spot".to_string(),
                    0.5,
                )]),
                max_strategy_weight: 0.5,
                min_strategy_weight: 0.05,
                drawdown_throttle: 0.2,
                sharpe_floor: 0.5,
                cooldown_minutes: 30,
                risk_bias_scalars: std::collections::BTreeMap::new(),
            },
        )
        .await
        .unwrap();

        assert!(!services.venues.is_empty());
        assert_eq!(services.primary_venue, "coinbase");
        assert_eq!(services.store.list_books().await.unwrap().len(), 1);
        assert!(services
            .store
            .venue_by_name("coinbase")
            .await
            .unwrap()
            .is_some());
    }
}
