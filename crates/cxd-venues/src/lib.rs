//! Venue adapter boundary.
//!
//! This crate defines **only** the capability set separating venue-specific
//! wire protocol from the rest of the engine, plus the name-keyed registry
//! the OMS and reconciliation resolve adapters through. No concrete venue
//! logic lives here.
//!
//! Implementations must be object-safe (`Arc<dyn VenueAdapter>`) and
//! `Send + Sync` so they can be shared across the engine's loops.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cxd_domain::{MarketSnapshot, Order, Side, VenueHealth};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a venue adapter may surface.
///
/// Policy: idempotent reads may be retried inside the adapter;
/// `place_order` is NEVER retried — a failure is surfaced to the OMS as a
/// rejection and reconciliation catches up.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// `connect()` has not succeeded yet.
    NotConnected,
    /// Network or transport failure.
    Transport(String),
    /// The venue returned an application-level error.
    Api { code: Option<i64>, message: String },
    /// The venue rejected the request outright.
    Rejected(String),
    /// The request timed out (default budget 30 s).
    Timeout,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::NotConnected => write!(f, "adapter not connected"),
            AdapterError::Transport(msg) => write!(f, "transport error: {msg}"),
            AdapterError::Api {
                code: Some(c),
                message,
            } => write!(f, "venue api error code={c}: {message}"),
            AdapterError::Api { code: None, message } => write!(f, "venue api error: {message}"),
            AdapterError::Rejected(msg) => write!(f, "venue rejected request: {msg}"),
            AdapterError::Timeout => write!(f, "venue request timed out"),
        }
    }
}

impl std::error::Error for AdapterError {}

// ---------------------------------------------------------------------------
// Venue-side rows
// ---------------------------------------------------------------------------

/// An order as the venue reports it. `status` is the venue's raw wording
/// (`"done"`, `"partially_filled"`, `"expired"`, ...); reconciliation
/// normalises it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenueOrderRow {
    pub venue_order_id: String,
    /// Our order id when the venue echoes the client id back.
    pub client_order_id: Option<Uuid>,
    pub instrument: String,
    pub side: Side,
    pub size: f64,
    pub filled_size: f64,
    pub avg_fill_price: Option<f64>,
    pub status: String,
}

/// A position as the venue reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenuePositionRow {
    pub instrument: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Capability set
// ---------------------------------------------------------------------------

/// The full capability set a venue adapter provides.
///
/// `place_order` consumes the order and returns it with `venue_order_id`,
/// `status`, `filled_size`, `filled_price`, `slippage_bps` and `latency_ms`
/// populated. Every reported fill must carry `filled_price > 0`; a zero or
/// missing price on a fill is a critical signal handled by the OMS.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Lower-case venue name, e.g. `"coinbase"`.
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), AdapterError>;

    async fn disconnect(&self);

    async fn place_order(&self, order: Order) -> Result<Order, AdapterError>;

    /// Returns `true` when the venue confirmed the cancel.
    async fn cancel_order(&self, venue_order_id: &str) -> Result<bool, AdapterError>;

    /// Asset → free quantity.
    async fn get_balance(&self) -> Result<BTreeMap<String, f64>, AdapterError>;

    async fn get_positions(&self) -> Result<Vec<VenuePositionRow>, AdapterError>;

    async fn get_open_orders(&self) -> Result<Vec<VenueOrderRow>, AdapterError>;

    /// Recently filled orders, newest first. Default: venue does not expose
    /// a fills endpoint.
    async fn get_recent_fills(&self) -> Result<Vec<VenueOrderRow>, AdapterError> {
        Ok(Vec::new())
    }

    async fn get_ticker(&self, instrument: &str) -> Result<Option<MarketSnapshot>, AdapterError>;

    async fn health_check(&self) -> VenueHealth;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed adapter registry shared by the OMS, the execution planner and
/// reconciliation. Registration replaces inheritance: paper and live
/// implementations satisfy the same capability set and are addressed by
/// venue name only.
#[derive(Clone, Default)]
pub struct VenueRegistry {
    adapters: BTreeMap<String, Arc<dyn VenueAdapter>>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn VenueAdapter>) {
        self.adapters
            .insert(adapter.name().to_lowercase(), adapter);
    }

    pub fn get(&self, venue: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.adapters.get(&venue.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn VenueAdapter>)> {
        self.adapters.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxd_domain::VenueStatus;

    struct StubAdapter {
        name: String,
    }

    #[async_trait]
    impl VenueAdapter for StubAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn place_order(&self, order: Order) -> Result<Order, AdapterError> {
            Ok(order)
        }

        async fn cancel_order(&self, _venue_order_id: &str) -> Result<bool, AdapterError> {
            Ok(true)
        }

        async fn get_balance(&self) -> Result<BTreeMap<String, f64>, AdapterError> {
            Ok(BTreeMap::new())
        }

        async fn get_positions(&self) -> Result<Vec<VenuePositionRow>, AdapterError> {
            Ok(Vec::new())
        }

        async fn get_open_orders(&self) -> Result<Vec<VenueOrderRow>, AdapterError> {
            Ok(Vec::new())
        }

        async fn get_ticker(
            &self,
            _instrument: &str,
        ) -> Result<Option<MarketSnapshot>, AdapterError> {
            Ok(None)
        }

        async fn health_check(&self) -> VenueHealth {
            let mut h = VenueHealth::healthy(Uuid::new_v4(), self.name.clone(), 10);
            h.status = VenueStatus::Healthy;
            h
        }
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let mut reg = VenueRegistry::new();
        reg.register(Arc::new(StubAdapter {
            name: "coinbase".into(),
        }));
        assert!(reg.get("Coinbase").is_some());
        assert!(reg.get("COINBASE").is_some());
        assert!(reg.get("kraken").is_none());
    }
}
