//! End-to-end paper cycle: candles show an aligned uptrend, market data is
//! live, and one scan cycle carries an intent through allocator and OMS to
//! a filled paper order.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cxd_config::{
    AllocatorConfig, EngineConfig, FeeSchedule, ScannerConfig, StrategyConfigDoc,
    StrategyDefinition, StrategyTimeframes, StrategyType, VenueConfig, VenueMode,
};
use cxd_domain::Book;
use cxd_marketdata::{NoopPublisher, QuoteUpdate};
use cxd_store::{MemStore, Store};
use cxd_supervisor::{build_paper_services, scan_cycle, services::build_services};

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

fn strategy_doc() -> StrategyConfigDoc {
    StrategyConfigDoc {
        scanner: ScannerConfig {
            top_k: 3,
            max_opportunities: 10,
        },
        strategies: vec![StrategyDefinition {
            id: None,
            name: "btc-trend".to_string(),
            strategy_type: StrategyType::Spot,
            universe: vec!["BTC-USD".to_string()],
            timeframes: Some(StrategyTimeframes {
                fast: "5m".into(),
                medium: "1h".into(),
                slow: "4h".into(),
            }),
            min_confidence: 0.1,
            max_risk_per_trade: 0.01,
            expected_holding_minutes: 60,
            venue_routing: vec!["coinbase".to_string()],
            book_type: None,
            book_id: None,
            min_edge_bps: None,
            parameters: serde_json::Value::Null,
            enabled: true,
        }],
    }
}

fn allocator_config() -> AllocatorConfig {
    AllocatorConfig {
        base_weights: BTreeMap::from([("spot".to_string(), 0.5)]),
        max_strategy_weight: 0.5,
        min_strategy_weight: 0.05,
        drawdown_throttle: 0.2,
        sharpe_floor: 0.5,
        cooldown_minutes: 30,
        risk_bias_scalars: BTreeMap::new(),
    }
}

#[tokio::test]
async fn scan_cycle_turns_trend_into_a_filled_order() {
    let store = Arc::new(MemStore::new());
    let services = build_services(
        engine_config(),
        strategy_doc(),
        allocator_config(),
        store.clone() as Arc<dyn Store>,
        Arc::new(NoopPublisher),
    )
    .await
    .unwrap();

    let book = Book::new("paper", "alpha", 100_000.0, 100_000.0);
    store.upsert_book(&book).await.unwrap();

    // Backfill an uptrend into the candle buffer: hourly samples rising.
    let t0 = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    for i in 0..60 {
        services
            .candles
            .observe_at("BTC-USD", 100.0 + i as f64 * 0.5, t0 + Duration::hours(i))
            .await;
    }

    // Live, tight quote with deep volume.
    let mid = 129.5;
    let mut quote = QuoteUpdate::new("coinbase", "BTC-USD", mid - 0.01, mid + 0.01, mid)
        .with_volume(10_000_000.0);
    quote.volatility_bps = Some(0.0);
    services.marketdata.update_quote(quote).await;

    scan_cycle(&services).await.unwrap();

    // An order was written by the OMS and exposure moved.
    let orders = store.all_orders().await;
    assert!(
        !orders.is_empty(),
        "audit trail: {:?}",
        store.audit_actions().await
    );
    let updated = store.fetch_book(book.id).await.unwrap().unwrap();
    assert!(updated.current_exposure > 0.0);

    let actions = store.audit_actions().await;
    assert!(actions.iter().any(|a| a == "intent_approved"));
}

#[tokio::test]
async fn stale_market_data_skips_allocation_but_not_the_process() {
    let services = build_paper_services(engine_config(), strategy_doc(), allocator_config())
        .await
        .unwrap();

    // No quotes at all: every venue is stale, the cycle must still complete
    // without error (graceful degradation).
    scan_cycle(&services).await.unwrap();
}
