//! Live-adapter behaviour against a mock venue: connect, order placement,
//! and the consecutive-error health ladder (2 → degraded, 5 → offline).

use httpmock::prelude::*;

use cxd_domain::{Order, OrderStatus, OrderType, Side, VenueStatus};
use cxd_venue_coinbase::{CoinbaseVenue, Credentials};
use cxd_venues::{AdapterError, VenueAdapter};
use uuid::Uuid;

fn venue_for(server: &MockServer) -> CoinbaseVenue {
    CoinbaseVenue::with_base_url(Credentials::new("key", "secret"), server.base_url())
}

fn market_order() -> Order {
    Order::new(
        Uuid::new_v4(),
        None,
        None,
        "BTC-USD",
        Side::Buy,
        0.5,
        OrderType::Market,
        None,
    )
}

#[tokio::test]
async fn connect_probes_accounts_endpoint() {
    let server = MockServer::start();
    let accounts = server.mock(|when, then| {
        when.method(GET).path("/api/v3/brokerage/accounts");
        then.status(200)
            .json_body(serde_json::json!({"accounts": [{"currency": "USD", "available_balance": {"value": "1000"}}]}));
    });

    let venue = venue_for(&server);
    venue.connect().await.unwrap();
    accounts.assert();

    let balances = venue.get_balance().await.unwrap();
    assert_eq!(balances["USD"], 1000.0);
}

#[tokio::test]
async fn place_order_success_populates_venue_order_id() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v3/brokerage/accounts");
        then.status(200).json_body(serde_json::json!({"accounts": []}));
    });
    let orders = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v3/brokerage/orders")
            .header_exists("CB-ACCESS-SIGN")
            .header_exists("CB-ACCESS-TIMESTAMP")
            .header("CB-ACCESS-KEY", "key");
        then.status(200).json_body(serde_json::json!({
            "success": true,
            "success_response": {"order_id": "cb-123"}
        }));
    });

    let venue = venue_for(&server);
    venue.connect().await.unwrap();

    let placed = venue.place_order(market_order()).await.unwrap();
    orders.assert();
    assert_eq!(placed.venue_order_id.as_deref(), Some("cb-123"));
    assert_eq!(placed.status, OrderStatus::Open);
    assert!(placed.latency_ms.is_some());
}

#[tokio::test]
async fn rejected_order_is_an_error_not_a_retry() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v3/brokerage/accounts");
        then.status(200).json_body(serde_json::json!({"accounts": []}));
    });
    let orders = server.mock(|when, then| {
        when.method(POST).path("/api/v3/brokerage/orders");
        then.status(200).json_body(serde_json::json!({
            "success": false,
            "error_response": {"message": "INSUFFICIENT_FUND"}
        }));
    });

    let venue = venue_for(&server);
    venue.connect().await.unwrap();

    let err = venue.place_order(market_order()).await.unwrap_err();
    assert!(matches!(err, AdapterError::Rejected(_)));
    // Exactly one attempt: place_order must never retry.
    orders.assert_hits(1);
}

#[tokio::test]
async fn consecutive_errors_degrade_then_offline() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v3/brokerage/accounts");
        then.status(200).json_body(serde_json::json!({"accounts": []}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v3/brokerage/orders/batch_cancel");
        then.status(500).json_body(serde_json::json!({"error": "boom"}));
    });
    // Ticker (used by health_check latency probe) also fails so the error
    // count is not reset mid-test.
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/v3/brokerage/products/BTC-USD/ticker");
        then.status(500).json_body(serde_json::json!({"error": "boom"}));
    });

    let venue = venue_for(&server);
    venue.connect().await.unwrap();

    for _ in 0..2 {
        let _ = venue.cancel_order("x").await;
    }
    let health = venue.health_check().await;
    assert_eq!(health.status, VenueStatus::Degraded);

    for _ in 0..3 {
        let _ = venue.cancel_order("x").await;
    }
    let health = venue.health_check().await;
    assert_eq!(health.status, VenueStatus::Offline);
    assert!(health.error_rate > 0.0);
}
