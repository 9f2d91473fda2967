//! Reconciliation auto-correct: the venue reports an order filled while the
//! internal row is still open, sizes agree, price within tolerance — the
//! internal status is promoted to `filled`, an `order_discrepancy_detected`
//! audit record is written, and the counter resets on the next clean run.

mod common;

use std::sync::Arc;

use common::harness;
use cxd_domain::{Order, OrderStatus, OrderType, Side};
use cxd_store::Store;
use cxd_venue_paper::PaperVenue;
use cxd_venues::VenueOrderRow;

fn open_internal_order(book_id: uuid::Uuid, venue_id: uuid::Uuid) -> Order {
    let mut order = Order::new(
        book_id,
        None,
        Some(venue_id),
        "BTC-USD",
        Side::Buy,
        1.0,
        OrderType::Market,
        None,
    );
    order.status = OrderStatus::Open;
    order.venue_order_id = Some("paper-recon-1".to_string());
    order
}

#[tokio::test]
async fn venue_filled_internal_open_promotes_to_filled() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;

    let internal = open_internal_order(h.book.id, venue.venue_id());
    h.store.upsert_order(&internal).await.unwrap();

    // Venue truth: same order, fully filled at a price within 0.1%.
    venue.set_venue_order(VenueOrderRow {
        venue_order_id: "paper-recon-1".to_string(),
        client_order_id: Some(internal.id),
        instrument: "BTC-USD".to_string(),
        side: Side::Buy,
        size: 1.0,
        filled_size: 1.0,
        avg_fill_price: Some(50_000.0),
        status: "done".to_string(),
    });

    let report = h.recon.reconcile_venue("coinbase").await.unwrap();
    assert_eq!(report.status, "mismatch");
    assert_eq!(report.auto_corrected, 1);

    let corrected = h.store.fetch_order(internal.id).await.unwrap().unwrap();
    assert_eq!(corrected.status, OrderStatus::Filled);
    assert_eq!(corrected.filled_size, 1.0);
    assert_eq!(corrected.filled_price, Some(50_000.0));

    let actions = h.store.audit_actions().await;
    assert!(actions.iter().any(|a| a == "order_discrepancy_detected"));
    assert!(actions.iter().any(|a| a == "order_status_auto_corrected"));

    // The corrected order is terminal, so the next run is clean and the
    // counter resets.
    let report = h.recon.reconcile_venue("coinbase").await.unwrap();
    assert_eq!(report.status, "ok");
    assert_eq!(report.mismatch_count, 0);
    assert_eq!(h.recon.mismatch_count("coinbase").await, 0);
}

#[tokio::test]
async fn price_outside_tolerance_flags_but_does_not_promote_price() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;

    let mut internal = open_internal_order(h.book.id, venue.venue_id());
    internal.status = OrderStatus::Partial;
    internal.filled_size = 1.0;
    internal.filled_price = Some(50_000.0);
    h.store.upsert_order(&internal).await.unwrap();

    // Venue price differs by 1% (tolerance is 0.1%).
    venue.set_venue_order(VenueOrderRow {
        venue_order_id: "paper-recon-1".to_string(),
        client_order_id: Some(internal.id),
        instrument: "BTC-USD".to_string(),
        side: Side::Buy,
        size: 1.0,
        filled_size: 1.0,
        avg_fill_price: Some(50_500.0),
        status: "done".to_string(),
    });

    let report = h.recon.reconcile_venue("coinbase").await.unwrap();
    let fields: Vec<_> = report
        .order_mismatches
        .iter()
        .map(|m| m.field.as_str())
        .collect();
    assert!(fields.contains(&"filled_price"), "mismatches: {fields:?}");
}

#[tokio::test]
async fn missing_on_venue_is_flagged_not_corrected() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;

    let internal = open_internal_order(h.book.id, venue.venue_id());
    h.store.upsert_order(&internal).await.unwrap();

    let report = h.recon.reconcile_venue("coinbase").await.unwrap();
    assert_eq!(report.auto_corrected, 0);
    assert_eq!(report.order_mismatches.len(), 1);
    assert_eq!(report.order_mismatches[0].field, "presence");

    // The internal order is untouched.
    let unchanged = h.store.fetch_order(internal.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, OrderStatus::Open);
}
