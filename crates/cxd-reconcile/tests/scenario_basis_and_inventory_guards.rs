//! Basis hedge-ratio band and spot inventory drift checks: both set books
//! reduce-only and leave an audit trail.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::harness;
use cxd_domain::BookStatus;
use cxd_store::{InstrumentRow, InventoryRow, Store, StrategyRow};
use cxd_venue_paper::PaperVenue;
use uuid::Uuid;

#[tokio::test]
async fn hedge_ratio_outside_band_sets_owning_book_reduce_only() {
    let venue = Arc::new(PaperVenue::with_seed("bybit", 42));
    let h = harness(vec![venue.clone()]).await;

    let strategy_id = Uuid::new_v4();
    let instrument_id = Uuid::new_v4();
    h.store
        .upsert_strategy(&StrategyRow {
            id: strategy_id,
            tenant_id: "desk-1".to_string(),
            name: "btc-basis".to_string(),
            strategy_type: "basis".to_string(),
            enabled: true,
            max_notional: 0.0,
            min_notional: 0.0,
            capacity_estimate: 0.0,
            book_id: Some(h.book.id),
            parameters: serde_json::Value::Null,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    // Build a lopsided hedge: spot 1.5, deriv -1.0 -> ratio 1.5.
    h.store
        .apply_strategy_position_delta("desk-1", strategy_id, instrument_id, "spot", 1.5)
        .await
        .unwrap();
    h.store
        .apply_strategy_position_delta("desk-1", strategy_id, instrument_id, "deriv", -1.0)
        .await
        .unwrap();

    h.recon.run_all().await;

    let book = h.store.fetch_book(h.book.id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::ReduceOnly);

    let alerts = h.store.alert_titles().await;
    assert!(alerts.iter().any(|t| t.contains("Basis Hedge Ratio")));
    let actions = h.store.audit_actions().await;
    assert!(actions.iter().any(|a| a == "basis_hedge_ratio_mismatch"));
}

#[tokio::test]
async fn hedge_check_runs_once_per_cycle_not_per_venue() {
    // Two registered venues; the hedge view is tenant-wide, so one cycle
    // must produce exactly one alert and one audit record.
    let bybit = Arc::new(PaperVenue::with_seed("bybit", 42));
    let coinbase = Arc::new(PaperVenue::with_seed("coinbase", 43));
    let h = harness(vec![bybit, coinbase]).await;

    let strategy_id = Uuid::new_v4();
    let instrument_id = Uuid::new_v4();
    h.store
        .upsert_strategy(&StrategyRow {
            id: strategy_id,
            tenant_id: "desk-1".to_string(),
            name: "btc-basis".to_string(),
            strategy_type: "basis".to_string(),
            enabled: true,
            max_notional: 0.0,
            min_notional: 0.0,
            capacity_estimate: 0.0,
            book_id: Some(h.book.id),
            parameters: serde_json::Value::Null,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    h.store
        .apply_strategy_position_delta("desk-1", strategy_id, instrument_id, "spot", 1.5)
        .await
        .unwrap();
    h.store
        .apply_strategy_position_delta("desk-1", strategy_id, instrument_id, "deriv", -1.0)
        .await
        .unwrap();

    let reports = h.recon.run_all().await;
    assert_eq!(reports.len(), 2);

    let alerts = h.store.alert_titles().await;
    let hedge_alerts = alerts
        .iter()
        .filter(|t| t.contains("Basis Hedge Ratio"))
        .count();
    assert_eq!(hedge_alerts, 1, "alerts: {alerts:?}");

    let actions = h.store.audit_actions().await;
    let hedge_audits = actions
        .iter()
        .filter(|a| *a == "basis_hedge_ratio_mismatch")
        .count();
    assert_eq!(hedge_audits, 1, "actions: {actions:?}");
}

#[tokio::test]
async fn balanced_hedge_inside_band_is_left_alone() {
    let venue = Arc::new(PaperVenue::with_seed("bybit", 42));
    let h = harness(vec![venue.clone()]).await;

    let strategy_id = Uuid::new_v4();
    let instrument_id = Uuid::new_v4();
    h.store
        .apply_strategy_position_delta("desk-1", strategy_id, instrument_id, "spot", 1.0)
        .await
        .unwrap();
    h.store
        .apply_strategy_position_delta("desk-1", strategy_id, instrument_id, "deriv", -1.0)
        .await
        .unwrap();

    h.recon.run_all().await;

    let book = h.store.fetch_book(h.book.id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Active);
}

#[tokio::test]
async fn inventory_drift_over_two_percent_freezes_books() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;

    let instrument_id = Uuid::new_v4();
    h.store
        .upsert_instrument(&InstrumentRow {
            id: instrument_id,
            tenant_id: "desk-1".to_string(),
            venue_id: venue.venue_id(),
            venue_symbol: "BTC-USD".to_string(),
            common_symbol: "BTC-USD".to_string(),
        })
        .await
        .unwrap();
    // Recorded inventory says 2 BTC; the venue balance says 1 BTC.
    h.store
        .upsert_inventory(&InventoryRow {
            tenant_id: "desk-1".to_string(),
            venue_id: venue.venue_id(),
            instrument_id,
            available_qty: 2.0,
        })
        .await
        .unwrap();
    venue.set_balance("BTC", 1.0);

    h.recon.reconcile_venue("coinbase").await.unwrap();

    let book = h.store.fetch_book(h.book.id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::ReduceOnly);
    let alerts = h.store.alert_titles().await;
    assert!(alerts.iter().any(|t| t.contains("Spot Inventory Drift")));
}

#[tokio::test]
async fn inventory_within_tolerance_is_clean() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;

    let instrument_id = Uuid::new_v4();
    h.store
        .upsert_instrument(&InstrumentRow {
            id: instrument_id,
            tenant_id: "desk-1".to_string(),
            venue_id: venue.venue_id(),
            venue_symbol: "BTC-USD".to_string(),
            common_symbol: "BTC-USD".to_string(),
        })
        .await
        .unwrap();
    h.store
        .upsert_inventory(&InventoryRow {
            tenant_id: "desk-1".to_string(),
            venue_id: venue.venue_id(),
            instrument_id,
            available_qty: 1.0,
        })
        .await
        .unwrap();
    venue.set_balance("BTC", 1.01); // 1% drift, under the 2% threshold

    h.recon.reconcile_venue("coinbase").await.unwrap();
    let book = h.store.fetch_book(h.book.id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Active);
}
