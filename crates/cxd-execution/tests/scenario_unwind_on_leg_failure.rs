//! Two-leg cross-venue plan where the second leg fails: the first leg's
//! fill is flattened with an opposite-side market order of equal size, the
//! OMS returns no order, and an unwind alert is raised.

mod common;

use std::sync::Arc;

use common::{feed_tight_quote, harness};
use cxd_domain::{
    ExecutionLeg, ExecutionPlan, IntentMeta, MetaEntry, Side, TradeIntent,
};
use cxd_store::Store;
use cxd_venue_paper::PaperVenue;
use cxd_venues::AdapterError;
use uuid::Uuid;

fn arb_intent(book_id: Uuid, buy_venue: &str, sell_venue: &str) -> TradeIntent {
    let plan = ExecutionPlan::legged(vec![
        ExecutionLeg::market(buy_venue, "BTC-USD", Side::Buy).with_max_slippage_bps(10.0),
        ExecutionLeg::market(sell_venue, "BTC-USD", Side::Sell).with_max_slippage_bps(10.0),
    ]);
    let mut intent = TradeIntent::new(
        book_id,
        Uuid::new_v4(),
        "BTC-USD",
        Side::Buy,
        1_000.0,
        20.0,
        5,
        0.8,
    );
    intent.meta = IntentMeta::new()
        .with(MetaEntry::ExpectedEdge { edge_bps: 200.0 })
        .with(MetaEntry::Plan(plan));
    intent
}

#[tokio::test]
async fn failing_second_leg_unwinds_the_first() {
    let venue_a = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let venue_b = Arc::new(PaperVenue::with_seed("kraken", 43));
    venue_a.set_reference_price("BTC-USD", 100.5);
    venue_b.set_reference_price("BTC-USD", 103.5);
    venue_b.fail_next_place_order(AdapterError::Transport("connection reset".into()));

    let h = harness(vec![venue_a, venue_b]).await;
    feed_tight_quote(&h, "coinbase", "BTC-USD", 100.5).await;

    let intent = arb_intent(h.book.id, "coinbase", "kraken");
    let result = h.oms.execute_intent(&intent, "coinbase").await.unwrap();
    assert!(result.is_none(), "aborted plan must return no order");

    // Venue A received two orders: the buy leg and its opposite-side unwind.
    let orders = h.store.all_orders().await;
    let buys: Vec<_> = orders.iter().filter(|o| o.side == Side::Buy).collect();
    let sells: Vec<_> = orders.iter().filter(|o| o.side == Side::Sell).collect();
    assert_eq!(buys.len(), 1, "orders: {orders:?}");
    assert_eq!(sells.len(), 1, "orders: {orders:?}");
    let leg = buys[0];
    let unwind = sells[0];
    assert_eq!(unwind.instrument, leg.instrument);
    assert!(
        (unwind.size - leg.filled_size.max(leg.size)).abs() < 1e-12,
        "unwind size {} must equal max(filled, size) {}",
        unwind.size,
        leg.filled_size.max(leg.size)
    );

    // Alerting: unwind_triggered is raised.
    let titles = h.store.alert_titles().await;
    assert!(
        titles.iter().any(|t| t.contains("unwind_triggered")),
        "alerts: {titles:?}"
    );

    // The multi-leg intent never ends filled.
    let row = h
        .store
        .fetch_multi_leg_intent(intent.id)
        .await
        .unwrap()
        .expect("multi_leg_intent row recorded");
    assert_eq!(row.status, "unwound");

    // Leg events cover the full trail.
    let events = h.store.leg_events_for_intent(intent.id).await.unwrap();
    let kinds: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(kinds.contains(&"leg_submitted"));
    assert!(kinds.contains(&"leg_executed"));
    assert!(kinds.contains(&"leg_failed"));
    assert!(kinds.contains(&"unwind_submitted"));
}

#[tokio::test]
async fn missing_adapter_aborts_before_any_submission() {
    let venue_a = Arc::new(PaperVenue::with_seed("coinbase", 42));
    venue_a.set_reference_price("BTC-USD", 100.5);
    let h = harness(vec![venue_a]).await;
    feed_tight_quote(&h, "coinbase", "BTC-USD", 100.5).await;

    // Second leg routes to a venue with no registered adapter; it is the
    // FIRST leg in the plan, so nothing fills and nothing unwinds.
    let plan = ExecutionPlan::legged(vec![
        ExecutionLeg::market("binance", "BTC-USD", Side::Buy),
        ExecutionLeg::market("coinbase", "BTC-USD", Side::Sell),
    ]);
    let mut intent = TradeIntent::new(
        h.book.id,
        Uuid::new_v4(),
        "BTC-USD",
        Side::Buy,
        1_000.0,
        20.0,
        5,
        0.8,
    );
    intent.meta = IntentMeta::new()
        .with(MetaEntry::ExpectedEdge { edge_bps: 200.0 })
        .with(MetaEntry::Plan(plan));

    let result = h.oms.execute_intent(&intent, "coinbase").await.unwrap();
    assert!(result.is_none());
    assert!(h.store.all_orders().await.is_empty());
}

#[tokio::test]
async fn atomic_multi_leg_plans_are_rejected_up_front() {
    let venue_a = Arc::new(PaperVenue::with_seed("coinbase", 42));
    venue_a.set_reference_price("BTC-USD", 100.5);
    let h = harness(vec![venue_a.clone()]).await;
    feed_tight_quote(&h, "coinbase", "BTC-USD", 100.5).await;

    let mut plan = ExecutionPlan::legged(vec![
        ExecutionLeg::market("coinbase", "BTC-USD", Side::Buy),
        ExecutionLeg::market("coinbase", "BTC-USD", Side::Sell),
    ]);
    plan.mode = cxd_domain::ExecutionMode::Atomic;

    let mut intent = TradeIntent::new(
        h.book.id,
        Uuid::new_v4(),
        "BTC-USD",
        Side::Buy,
        1_000.0,
        20.0,
        5,
        0.8,
    );
    intent.meta = IntentMeta::new()
        .with(MetaEntry::ExpectedEdge { edge_bps: 200.0 })
        .with(MetaEntry::Plan(plan));

    let result = h.oms.execute_intent(&intent, "coinbase").await.unwrap();
    assert!(result.is_none());
    assert!(h.store.all_orders().await.is_empty(), "no leg may submit");

    let records = h.store.recent_audit(10).await.unwrap();
    assert!(records.iter().any(|r| r.action == "atomic_not_supported"));
}
