//! Paper-mode venue simulator.
//!
//! Satisfies the full [`VenueAdapter`] capability set with simulated fills:
//!
//! - network latency 20–100 ms (recorded, not slept),
//! - uniform slippage 5–20 bps against the order,
//! - 10 % chance of a partial fill in [0.5, 0.95] of requested size,
//! - simulated balances and venue-side positions so reconciliation and
//!   inventory-drift checks can run end-to-end against paper venues.
//!
//! Seeding is optional: [`PaperVenue::with_seed`] makes every fill sequence
//! reproducible for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use cxd_domain::{
    DataQuality, MarketSnapshot, Order, OrderStatus, Side, VenueHealth, VenueStatus,
};
use cxd_venues::{AdapterError, VenueAdapter, VenueOrderRow, VenuePositionRow};

struct PaperState {
    rng: ChaCha8Rng,
    connected: bool,
    orders: BTreeMap<String, VenueOrderRow>,
    /// instrument -> signed size (+long / -short) and entry price.
    positions: BTreeMap<String, (f64, f64)>,
    balances: BTreeMap<String, f64>,
    reference_prices: BTreeMap<String, f64>,
    /// One-shot failure injections for tests, consumed in order.
    injected_failures: Vec<AdapterError>,
}

/// Deterministic-seedable paper venue.
pub struct PaperVenue {
    name: String,
    venue_id: Uuid,
    supported_instruments: Vec<String>,
    state: Mutex<PaperState>,
}

impl PaperVenue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_seed(name, rand::random())
    }

    pub fn with_seed(name: impl Into<String>, seed: u64) -> Self {
        let mut balances = BTreeMap::new();
        balances.insert("USD".to_string(), 100_000.0);

        Self {
            name: name.into().to_lowercase(),
            venue_id: Uuid::new_v4(),
            supported_instruments: vec![
                "BTC-USD".to_string(),
                "ETH-USD".to_string(),
                "SOL-USD".to_string(),
            ],
            state: Mutex::new(PaperState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                connected: false,
                orders: BTreeMap::new(),
                positions: BTreeMap::new(),
                balances,
                reference_prices: BTreeMap::from([
                    ("BTC-USD".to_string(), 50_000.0),
                    ("ETH-USD".to_string(), 3_000.0),
                    ("SOL-USD".to_string(), 100.0),
                ]),
                injected_failures: Vec::new(),
            }),
        }
    }

    pub fn venue_id(&self) -> Uuid {
        self.venue_id
    }

    /// Pin the reference price used for market orders without a limit price.
    pub fn set_reference_price(&self, instrument: &str, price: f64) {
        let mut g = self.state.lock().unwrap();
        g.reference_prices
            .insert(instrument.to_uppercase(), price);
    }

    /// Seed a balance (test / scenario wiring).
    pub fn set_balance(&self, asset: &str, qty: f64) {
        let mut g = self.state.lock().unwrap();
        g.balances.insert(asset.to_uppercase(), qty);
    }

    /// Seed a venue-side position (test / scenario wiring).
    pub fn set_position(&self, instrument: &str, signed_size: f64, entry_price: f64) {
        let mut g = self.state.lock().unwrap();
        g.positions
            .insert(instrument.to_uppercase(), (signed_size, entry_price));
    }

    /// Queue a failure for the next `place_order` call. Used by unwind and
    /// reconciliation scenarios.
    pub fn fail_next_place_order(&self, error: AdapterError) {
        let mut g = self.state.lock().unwrap();
        g.injected_failures.push(error);
    }

    /// Seed a venue-side order row directly (reconciliation scenario
    /// wiring: make the venue's view diverge from the internal one).
    pub fn set_venue_order(&self, row: VenueOrderRow) {
        let mut g = self.state.lock().unwrap();
        g.orders.insert(row.venue_order_id.clone(), row);
    }

    fn base_asset(instrument: &str) -> &str {
        instrument.split('-').next().unwrap_or(instrument)
    }

    fn quote_asset(instrument: &str) -> &str {
        instrument.split('-').nth(1).unwrap_or("USD")
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        let mut g = self.state.lock().unwrap();
        g.connected = true;
        info!(venue = %self.name, mode = "paper", "venue_connected");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut g = self.state.lock().unwrap();
        g.connected = false;
    }

    async fn place_order(&self, mut order: Order) -> Result<Order, AdapterError> {
        let mut g = self.state.lock().unwrap();

        if let Some(err) = g.injected_failures.pop() {
            return Err(err);
        }

        let latency_ms = g.rng.gen_range(20..=100) as i64;
        let slippage_bps = g.rng.gen_range(5.0..=20.0);

        let base_price = order.price.or_else(|| {
            g.reference_prices
                .get(&order.instrument.to_uppercase())
                .copied()
        });
        let base_price = match base_price {
            Some(p) if p > 0.0 => p,
            _ => {
                return Err(AdapterError::Rejected(format!(
                    "no reference price for {}",
                    order.instrument
                )))
            }
        };

        // Slippage always moves against the order.
        let slip = base_price * slippage_bps / 10_000.0;
        let fill_price = match order.side {
            Side::Buy => base_price + slip,
            Side::Sell => base_price - slip,
        };
        let fill_price = (fill_price * 100.0).round() / 100.0;

        // 10% chance of a partial fill in [0.5, 0.95] of requested size.
        let partial = g.rng.gen_bool(0.10);
        if partial {
            let ratio = g.rng.gen_range(0.5..=0.95);
            order.filled_size = order.size * ratio;
            order.status = OrderStatus::Partial;
            debug!(order_id = %order.id, ratio, "paper_order_partial");
        } else {
            order.filled_size = order.size;
            order.status = OrderStatus::Filled;
        }

        order.filled_price = Some(fill_price);
        order.slippage_bps = Some(slippage_bps);
        order.latency_ms = Some(latency_ms);
        let venue_order_id = format!("paper-{}", &Uuid::new_v4().simple().to_string()[..12]);
        order.venue_order_id = Some(venue_order_id.clone());
        order.updated_at = Utc::now();

        // Book the fill into simulated balances and positions.
        let signed = order.side.sign() * order.filled_size;
        let notional = order.filled_size * fill_price;
        let base = Self::base_asset(&order.instrument).to_string();
        let quote = Self::quote_asset(&order.instrument).to_string();
        *g.balances.entry(base).or_insert(0.0) += signed;
        *g.balances.entry(quote).or_insert(0.0) -= order.side.sign() * notional;

        let entry = g
            .positions
            .entry(order.instrument.to_uppercase())
            .or_insert((0.0, fill_price));
        let prev = entry.0;
        entry.0 += signed;
        if prev == 0.0 || prev.signum() == signed.signum() {
            entry.1 = fill_price;
        }

        g.orders.insert(
            venue_order_id.clone(),
            VenueOrderRow {
                venue_order_id,
                client_order_id: Some(order.id),
                instrument: order.instrument.clone(),
                side: order.side,
                size: order.size,
                filled_size: order.filled_size,
                avg_fill_price: order.filled_price,
                status: match order.status {
                    OrderStatus::Filled => "filled".to_string(),
                    _ => "partially_filled".to_string(),
                },
            },
        );

        info!(
            order_id = %order.id,
            price = fill_price,
            slippage_bps,
            latency_ms,
            "paper_order_filled"
        );

        Ok(order)
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<bool, AdapterError> {
        let mut g = self.state.lock().unwrap();
        if let Some(row) = g.orders.get_mut(venue_order_id) {
            row.status = "cancelled".to_string();
        }
        info!(venue_order_id, "paper_order_cancelled");
        Ok(true)
    }

    async fn get_balance(&self) -> Result<BTreeMap<String, f64>, AdapterError> {
        let g = self.state.lock().unwrap();
        Ok(g.balances.clone())
    }

    async fn get_positions(&self) -> Result<Vec<VenuePositionRow>, AdapterError> {
        let g = self.state.lock().unwrap();
        Ok(g.positions
            .iter()
            .filter(|(_, (size, _))| *size != 0.0)
            .map(|(instrument, (size, entry))| VenuePositionRow {
                instrument: instrument.clone(),
                side: if *size >= 0.0 { Side::Buy } else { Side::Sell },
                size: size.abs(),
                entry_price: Some(*entry),
            })
            .collect())
    }

    async fn get_open_orders(&self) -> Result<Vec<VenueOrderRow>, AdapterError> {
        let g = self.state.lock().unwrap();
        Ok(g.orders
            .values()
            .filter(|o| matches!(o.status.as_str(), "open" | "partially_filled"))
            .cloned()
            .collect())
    }

    async fn get_recent_fills(&self) -> Result<Vec<VenueOrderRow>, AdapterError> {
        let g = self.state.lock().unwrap();
        Ok(g.orders
            .values()
            .filter(|o| o.status == "filled")
            .cloned()
            .collect())
    }

    async fn get_ticker(&self, instrument: &str) -> Result<Option<MarketSnapshot>, AdapterError> {
        let mut g = self.state.lock().unwrap();
        let price = match g.reference_prices.get(&instrument.to_uppercase()).copied() {
            Some(p) => p,
            None => return Ok(None),
        };
        // Simulated half-spread of 2 bps around the reference price.
        let jitter = price * g.rng.gen_range(-0.0002..=0.0002);
        let mid = price + jitter;
        let half_spread = mid * 0.0002;
        let now = Utc::now();
        Ok(Some(MarketSnapshot::from_quote(
            self.name.clone(),
            instrument.to_uppercase(),
            mid - half_spread,
            mid + half_spread,
            mid,
            now,
            now,
            DataQuality::Simulated,
        )))
    }

    async fn health_check(&self) -> VenueHealth {
        let mut g = self.state.lock().unwrap();
        let connected = g.connected;
        let latency = g.rng.gen_range(20..=100) as i64;
        let mut health = VenueHealth::healthy(self.venue_id, self.name.clone(), latency);
        health.status = if connected {
            VenueStatus::Healthy
        } else {
            VenueStatus::Offline
        };
        health.is_enabled = connected;
        health.supported_instruments = self.supported_instruments.clone();
        health
    }
}
