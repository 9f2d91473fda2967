//! Basis plan (deriv leg on bybit, spot leg on coinbase) where the spot leg
//! raises: the deriv fill is unwound with an opposite-side market order and
//! no multi-leg intent ends in `filled`.

mod common;

use std::sync::Arc;

use common::{feed_tight_quote, harness};
use cxd_domain::{ExecutionLeg, ExecutionPlan, IntentMeta, MetaEntry, Side, TradeIntent};
use cxd_store::Store;
use cxd_venue_paper::PaperVenue;
use cxd_venues::AdapterError;
use uuid::Uuid;

#[tokio::test]
async fn deriv_leg_is_unwound_when_spot_leg_raises() {
    let bybit = Arc::new(PaperVenue::with_seed("bybit", 11));
    let coinbase = Arc::new(PaperVenue::with_seed("coinbase", 12));
    bybit.set_reference_price("BTC-PERP", 100.7);
    coinbase.set_reference_price("BTC-USD", 100.5);
    coinbase.fail_next_place_order(AdapterError::Api {
        code: Some(503),
        message: "venue unavailable".into(),
    });

    let h = harness(vec![bybit, coinbase]).await;
    feed_tight_quote(&h, "bybit", "BTC-PERP", 100.7).await;
    // The cost gate prices the intent's instrument on the routed venue.
    feed_tight_quote(&h, "bybit", "BTC-USD", 100.5).await;

    // Deriv first (short the rich perp), spot second.
    let plan = ExecutionPlan::legged(vec![
        ExecutionLeg::market("bybit", "BTC-PERP", Side::Sell).with_leg_type("deriv"),
        ExecutionLeg::market("coinbase", "BTC-USD", Side::Buy).with_leg_type("spot"),
    ]);
    let mut intent = TradeIntent::new(
        h.book.id,
        Uuid::new_v4(),
        "BTC-USD",
        Side::Buy,
        1_000.0,
        20.0,
        60,
        0.8,
    );
    intent.meta = IntentMeta::new()
        .with(MetaEntry::ExpectedEdge { edge_bps: 200.0 })
        .with(MetaEntry::Carry {
            funding_rate_bps: 8.0,
            basis_risk_bps: 3.0,
        })
        .with(MetaEntry::Strategy {
            name: "btc-basis".into(),
            strategy_type: "basis".into(),
        })
        .with(MetaEntry::Plan(plan));

    let result = h.oms.execute_intent(&intent, "bybit").await.unwrap();
    assert!(result.is_none());

    // The bybit short was flattened by an opposite-side (buy) market order.
    let orders = h.store.all_orders().await;
    let bybit_sells: Vec<_> = orders
        .iter()
        .filter(|o| o.instrument == "BTC-PERP" && o.side == Side::Sell)
        .collect();
    let bybit_buys: Vec<_> = orders
        .iter()
        .filter(|o| o.instrument == "BTC-PERP" && o.side == Side::Buy)
        .collect();
    assert_eq!(bybit_sells.len(), 1);
    assert_eq!(bybit_buys.len(), 1, "unwind order expected on bybit");
    let leg = bybit_sells[0];
    let unwind = bybit_buys[0];
    assert!((unwind.size - leg.filled_size.max(leg.size)).abs() < 1e-12);

    // No coinbase order exists: the spot leg never submitted.
    assert!(!orders.iter().any(|o| o.instrument == "BTC-USD"));

    // No multi-leg intent ends filled.
    let row = h
        .store
        .fetch_multi_leg_intent(intent.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(row.status, "filled");
    assert_eq!(row.status, "unwound");

    let titles = h.store.alert_titles().await;
    assert!(titles.iter().any(|t| t.contains("unwind_triggered")));
}
