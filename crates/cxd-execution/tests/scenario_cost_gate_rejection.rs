//! Cost-gate rejection: the same setup as the happy path but with a 5 bps
//! expected edge. The OMS returns no order, writes a `trade_blocked` audit
//! record with `gate=execution_cost`, and book exposure stays untouched.

mod common;

use std::sync::Arc;

use common::{bullish_intent, feed_tight_quote, harness};
use cxd_store::Store;
use cxd_venue_paper::PaperVenue;

#[tokio::test]
async fn thin_edge_is_blocked_before_any_order() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    venue.set_reference_price("BTC-USD", 100.5);
    let h = harness(vec![venue]).await;
    feed_tight_quote(&h, "coinbase", "BTC-USD", 100.5).await;

    let intent = bullish_intent(h.book.id, 5.0);
    let result = h.oms.execute_intent(&intent, "coinbase").await.unwrap();
    assert!(result.is_none(), "5 bps edge must not clear the cost gate");

    // No order was ever created.
    assert!(h.store.all_orders().await.is_empty());

    // Book exposure unchanged.
    let book = h.store.fetch_book(h.book.id).await.unwrap().unwrap();
    assert_eq!(book.current_exposure, 0.0);

    // Audit: trade_blocked with gate=execution_cost and the cost breakdown.
    let records = h.store.recent_audit(10).await.unwrap();
    let blocked = records
        .iter()
        .find(|r| r.action == "trade_blocked")
        .expect("trade_blocked audit record");
    let after = blocked.after_state.as_ref().unwrap();
    assert_eq!(after["gate"], "execution_cost");
    assert!(after["breakdown"]["total_cost_bps"].as_f64().unwrap() > 0.0);
    assert!(after["min_edge_bps"].as_f64().unwrap() > 5.0);
}

#[tokio::test]
async fn unavailable_market_data_is_blocked() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    venue.set_reference_price("BTC-USD", 100.5);
    let h = harness(vec![venue]).await;

    // Mark the pair unavailable instead of feeding a quote.
    h.marketdata
        .update_quote(
            cxd_marketdata::QuoteUpdate::new("coinbase", "BTC-USD", 0.0, 0.0, 0.0)
                .with_quality(cxd_domain::DataQuality::Unavailable),
        )
        .await;

    let intent = bullish_intent(h.book.id, 500.0);
    let result = h.oms.execute_intent(&intent, "coinbase").await.unwrap();
    assert!(
        result.is_none(),
        "unavailable data must reject regardless of edge"
    );
    assert!(h.store.all_orders().await.is_empty());
}
