//! Shared wiring for reconciliation scenarios.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use cxd_domain::Book;
use cxd_edge::EdgeCostModel;
use cxd_execution::{Oms, OmsConfig};
use cxd_marketdata::{MarketDataService, NoopPublisher};
use cxd_portfolio::PortfolioEngine;
use cxd_reconcile::{ReconcileConfig, ReconciliationService};
use cxd_risk::{CircuitBreakers, RiskConfig, RiskEngine};
use cxd_store::{MemStore, Store, VenueRow};
use cxd_venue_paper::PaperVenue;
use cxd_venues::{VenueAdapter, VenueRegistry};

pub struct Harness {
    pub store: Arc<MemStore>,
    pub breakers: Arc<CircuitBreakers>,
    pub recon: ReconciliationService,
    pub book: Book,
    pub registry: VenueRegistry,
}

pub async fn harness(venues: Vec<Arc<PaperVenue>>) -> Harness {
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let marketdata = MarketDataService::new(Arc::new(NoopPublisher));

    let mut registry = VenueRegistry::new();
    for venue in venues {
        venue.connect().await.unwrap();
        let mut row = VenueRow::new(venue.name().to_string(), "spot");
        row.id = venue.venue_id();
        store.upsert_venue(&row).await.unwrap();
        registry.register(venue);
    }

    let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
    store.upsert_book(&book).await.unwrap();

    let breakers = Arc::new(CircuitBreakers::new());
    let risk = RiskEngine::new(store.clone(), Arc::clone(&breakers), RiskConfig::default());
    let portfolio = PortfolioEngine::new(store.clone());
    let oms = Arc::new(Oms::new(
        store.clone(),
        registry.clone(),
        marketdata,
        risk.clone(),
        portfolio,
        EdgeCostModel::default(),
        OmsConfig {
            tenant_id: "desk-1".to_string(),
            tick: 1e-6,
            venue_fees: BTreeMap::new(),
            default_max_risk_per_trade: 0.01,
        },
    ));

    let recon = ReconciliationService::new(
        store.clone(),
        registry.clone(),
        risk,
        oms,
        ReconcileConfig::default(),
        "desk-1",
    );

    Harness {
        store,
        breakers,
        recon,
        book,
        registry,
    }
}
