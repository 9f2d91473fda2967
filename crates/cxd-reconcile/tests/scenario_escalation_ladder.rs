//! The escalation ladder: persistent mismatches activate the
//! `recon_mismatch` circuit breaker at three consecutive dirty runs, set
//! affected books reduce-only, and pull the kill switch at five.

mod common;

use std::sync::Arc;

use common::harness;
use cxd_domain::{BookStatus, Position, Severity, Side};
use cxd_store::Store;
use cxd_venue_paper::PaperVenue;

/// Seed a divergence the venue cannot explain: an internal position with no
/// venue-side counterpart.
async fn seed_position_mismatch(h: &common::Harness, venue: &Arc<PaperVenue>) {
    let position = Position::open(
        h.book.id,
        Some(venue.venue_id()),
        "BTC-USD",
        Side::Buy,
        1.0,
        50_000.0,
    );
    h.store.upsert_position(&position).await.unwrap();
}

#[tokio::test]
async fn third_dirty_run_trips_breaker_and_reduce_only() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;
    seed_position_mismatch(&h, &venue).await;

    for run in 1..=2 {
        let report = h.recon.reconcile_venue("coinbase").await.unwrap();
        assert_eq!(report.status, "mismatch");
        assert_eq!(report.mismatch_count, run);
        assert!(
            !h.breakers.is_active("recon_mismatch"),
            "breaker must not trip before run 3"
        );
    }

    let report = h.recon.reconcile_venue("coinbase").await.unwrap();
    assert_eq!(report.mismatch_count, 3);
    assert!(h.breakers.is_active("recon_mismatch"));
    assert!(report
        .actions_taken
        .contains(&"circuit_breaker_activated".to_string()));
    assert!(report.actions_taken.contains(&"books_reduce_only".to_string()));

    // The affected book went reduce-only.
    let book = h.store.fetch_book(h.book.id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::ReduceOnly);

    // Alerts escalate to critical at the third run.
    let alerts = h.store.recent_alerts(10).await.unwrap();
    assert!(alerts
        .iter()
        .any(|a| a.title.contains("Reconciliation Mismatch") && a.severity == Severity::Critical));
}

#[tokio::test]
async fn fifth_dirty_run_pulls_the_kill_switch() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;
    seed_position_mismatch(&h, &venue).await;

    for _ in 0..5 {
        h.recon.reconcile_venue("coinbase").await.unwrap();
    }

    assert_eq!(h.recon.mismatch_count("coinbase").await, 5);
    let reason = h.store.kill_switch(Some(h.book.id)).await.unwrap();
    assert!(
        reason.is_some(),
        "book-scoped kill switch must be active after run 5"
    );
}

#[tokio::test]
async fn clean_run_resets_the_counter() {
    let venue = Arc::new(PaperVenue::with_seed("coinbase", 42));
    let h = harness(vec![venue.clone()]).await;
    seed_position_mismatch(&h, &venue).await;

    h.recon.reconcile_venue("coinbase").await.unwrap();
    h.recon.reconcile_venue("coinbase").await.unwrap();
    assert_eq!(h.recon.mismatch_count("coinbase").await, 2);

    // Venue catches up: seed the same position on the venue side.
    venue.set_position("BTC-USD", 1.0, 50_000.0);
    let report = h.recon.reconcile_venue("coinbase").await.unwrap();
    assert_eq!(report.status, "ok");
    assert_eq!(report.mismatch_count, 0);

    // Counter starts over, so two more dirty runs still do not trip the
    // breaker.
    venue.set_position("BTC-USD", 0.0, 50_000.0);
    h.recon.reconcile_venue("coinbase").await.unwrap();
    h.recon.reconcile_venue("coinbase").await.unwrap();
    assert!(!h.breakers.is_active("recon_mismatch"));
}
