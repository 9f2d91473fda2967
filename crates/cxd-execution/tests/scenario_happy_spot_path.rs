//! Happy spot path: market data feeds a tight quote, a bullish intent with
//! healthy edge passes every gate, the paper venue fills, and book exposure
//! moves by the filled notional. The audit trail shows `intent_approved`
//! followed by the fill record.

mod common;

use std::sync::Arc;

use common::{bullish_intent, feed_tight_quote, harness};
use cxd_domain::OrderStatus;
use cxd_store::Store;
use cxd_venue_paper::PaperVenue;

#[tokio::test]
async fn intent_flows_to_filled_order_and_book_exposure() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    venue.set_reference_price("BTC-USD", 100.5);
    let h = harness(vec![venue]).await;
    feed_tight_quote(&h, "coinbase", "BTC-USD", 100.5).await;

    let intent = bullish_intent(h.book.id, 25.0);
    let order = h
        .oms
        .execute_intent(&intent, "coinbase")
        .await
        .unwrap()
        .expect("intent should produce an order");

    assert!(matches!(
        order.status,
        OrderStatus::Filled | OrderStatus::Partial
    ));
    let fill_price = order.filled_price.expect("fill must carry a price");
    assert!(fill_price > 0.0);
    assert!(order.filled_size > 0.0);
    assert!(order.filled_size <= order.size);

    // Book exposure moved by exactly the signed filled notional.
    let book = h.store.fetch_book(h.book.id).await.unwrap().unwrap();
    let expected = order.filled_size * fill_price;
    assert!(
        (book.current_exposure - expected).abs() < 1e-9,
        "exposure {} != filled notional {expected}",
        book.current_exposure
    );

    // A position row exists for the book.
    let positions = h.store.open_positions_for_book(h.book.id).await.unwrap();
    assert_eq!(positions.len(), 1);
    assert!((positions[0].size - order.filled_size).abs() < 1e-12);

    // Audit trail: intent_approved precedes the fill record.
    let actions = h.store.audit_actions().await;
    let approved_at = actions.iter().position(|a| a == "intent_approved");
    let filled_at = actions
        .iter()
        .position(|a| a == "order_filled" || a == "order_partial");
    assert!(approved_at.is_some(), "actions: {actions:?}");
    assert!(filled_at.is_some(), "actions: {actions:?}");
    assert!(approved_at.unwrap() < filled_at.unwrap());

    // The order row is persisted (OMS is the single writer).
    let stored = h.store.fetch_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, order.status);
}

#[tokio::test]
async fn fill_size_never_exceeds_order_size_across_many_runs() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 7));
    venue.set_reference_price("BTC-USD", 100.5);
    let h = harness(vec![venue]).await;
    feed_tight_quote(&h, "coinbase", "BTC-USD", 100.5).await;

    for _ in 0..50 {
        let intent = bullish_intent(h.book.id, 25.0);
        if let Some(order) = h.oms.execute_intent(&intent, "coinbase").await.unwrap() {
            assert!(order.filled_size <= order.size + 1e-12);
            if order.status == OrderStatus::Filled {
                assert!((order.filled_size - order.size).abs() < 1e-12);
                assert!(order.filled_price.unwrap() > 0.0);
            }
        }
    }
}
