//! Shared wiring for execution scenarios: in-memory store, market-data
//! service, paper venues, and a fully assembled OMS.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use cxd_domain::{Book, IntentMeta, MetaEntry, Side, TradeIntent};
use cxd_edge::{EdgeCostModel, VenueFees};
use cxd_execution::{Oms, OmsConfig};
use cxd_marketdata::{MarketDataService, NoopPublisher, QuoteUpdate};
use cxd_portfolio::PortfolioEngine;
use cxd_risk::{CircuitBreakers, RiskConfig, RiskEngine};
use cxd_store::{MemStore, Store, VenueRow};
use cxd_venue_paper::PaperVenue;
use cxd_venues::{VenueAdapter, VenueRegistry};
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<MemStore>,
    pub marketdata: MarketDataService,
    pub registry: VenueRegistry,
    pub oms: Oms,
    pub book: Book,
}

/// Build an OMS over paper venues. Fees are set low so the cost gate prices
/// mostly spread + impact.
pub async fn harness(venues: Vec<Arc<PaperVenue>>) -> Harness {
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let marketdata = MarketDataService::new(Arc::new(NoopPublisher));

    let mut registry = VenueRegistry::new();
    let mut venue_fees = BTreeMap::new();
    for venue in venues {
        venue.connect().await.unwrap();
        let mut row = VenueRow::new(venue.name().to_string(), "spot");
        row.id = venue.venue_id();
        store.upsert_venue(&row).await.unwrap();
        venue_fees.insert(
            venue.name().to_string(),
            VenueFees {
                maker_bps: 1.0,
                taker_bps: 2.0,
            },
        );
        registry.register(venue);
    }

    let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
    store.upsert_book(&book).await.unwrap();

    let breakers = Arc::new(CircuitBreakers::new());
    let risk = RiskEngine::new(store.clone(), breakers, RiskConfig::default());
    let portfolio = PortfolioEngine::new(store.clone());
    let edge = EdgeCostModel::default();
    let config = OmsConfig {
        tenant_id: "desk-1".to_string(),
        tick: 1e-6,
        venue_fees,
        default_max_risk_per_trade: 0.01,
    };

    let oms = Oms::new(
        store.clone(),
        registry.clone(),
        marketdata.clone(),
        risk,
        portfolio,
        edge,
        config,
    );

    Harness {
        store,
        marketdata,
        registry,
        oms,
        book,
    }
}

/// Build an OMS over one arbitrary adapter (used to inject misbehaving
/// venues).
pub async fn harness_with_adapter(adapter: Arc<dyn VenueAdapter>) -> Harness {
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let marketdata = MarketDataService::new(Arc::new(NoopPublisher));

    let mut registry = VenueRegistry::new();
    let mut row = VenueRow::new(adapter.name().to_string(), "spot");
    row.id = Uuid::new_v4();
    store.upsert_venue(&row).await.unwrap();
    let mut venue_fees = BTreeMap::new();
    venue_fees.insert(
        adapter.name().to_string(),
        VenueFees {
            maker_bps: 1.0,
            taker_bps: 2.0,
        },
    );
    registry.register(adapter);

    let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
    store.upsert_book(&book).await.unwrap();

    let breakers = Arc::new(CircuitBreakers::new());
    let risk = RiskEngine::new(store.clone(), breakers, RiskConfig::default());
    let portfolio = PortfolioEngine::new(store.clone());
    let edge = EdgeCostModel::default();
    let config = OmsConfig {
        tenant_id: "desk-1".to_string(),
        tick: 1e-6,
        venue_fees,
        default_max_risk_per_trade: 0.01,
    };

    let oms = Oms::new(
        store.clone(),
        registry.clone(),
        marketdata.clone(),
        risk,
        portfolio,
        edge,
        config,
    );

    Harness {
        store,
        marketdata,
        registry,
        oms,
        book,
    }
}

/// Feed a tight-spread quote so the cost gate prices a small total.
pub async fn feed_tight_quote(h: &Harness, venue: &str, instrument: &str, mid: f64) {
    let mut update = QuoteUpdate::new(venue, instrument, mid - 0.01, mid + 0.01, mid)
        .with_volume(10_000_000.0);
    update.volatility_bps = Some(0.0);
    h.marketdata.update_quote(update).await;
}

/// A bullish intent with the given expected edge in bps.
pub fn bullish_intent(book_id: uuid::Uuid, edge_bps: f64) -> TradeIntent {
    let mut intent = TradeIntent::new(
        book_id,
        Uuid::new_v4(),
        "BTC-USD",
        Side::Buy,
        1_000.0,
        20.0,
        60,
        0.7,
    );
    intent.meta = IntentMeta::new().with(MetaEntry::ExpectedEdge { edge_bps });
    intent
}
