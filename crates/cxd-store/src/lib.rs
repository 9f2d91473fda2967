//! Storage facade for the CrossDesk engine.
//!
//! The [`Store`] trait is the only way engine components touch persistent
//! state. Two implementations:
//!
//! - [`MemStore`] — in-memory, used by tests and paper runs.
//! - [`PgStore`] — Postgres via sqlx, used by live runs.
//!
//! Ownership discipline is enforced by convention at the call sites (the OMS
//! is the only component calling `upsert_order`; the portfolio engine is the
//! only one calling `apply_book_exposure_delta` outside of tests), not by
//! the trait — the store stays a dumb facade.

pub mod mem;
pub mod pg;
pub mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use cxd_domain::{Alert, AuditRecord, Book, BookStatus, Order, Position, VenueHealth};

pub use mem::MemStore;
pub use pg::PgStore;
pub use rows::{
    AllocationRow, AllocatorDecisionRow, InstrumentRow, InventoryRow, LegEventRow,
    MultiLegIntentRow, PerformanceRow, RegimeRow, RiskMetricsRow, StrategyPositionRow, StrategyRow,
    VenueRow,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    /// The requested row does not exist.
    NotFound { what: &'static str, id: String },
    /// Backend failure (connection, query, serialisation).
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { what, id } => write!(f, "{what} not found: {id}"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// The relational facade described by the external-interface contract. All
/// methods are async (IO is the only suspension point in the engine).
#[async_trait]
pub trait Store: Send + Sync {
    // -- orders (written only by the OMS) -----------------------------------

    async fn upsert_order(&self, order: &Order) -> StoreResult<()>;
    async fn fetch_order(&self, id: Uuid) -> StoreResult<Option<Order>>;
    /// Non-terminal orders for a venue created after `since` (reconciliation
    /// window, default 24 h).
    async fn open_orders_for_venue(
        &self,
        venue_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Order>>;

    // -- positions ----------------------------------------------------------

    async fn upsert_position(&self, position: &Position) -> StoreResult<()>;
    async fn open_positions_for_book(&self, book_id: Uuid) -> StoreResult<Vec<Position>>;
    async fn open_positions_for_venue(&self, venue_id: Uuid) -> StoreResult<Vec<Position>>;

    // -- books (mutated only by the portfolio engine / OMS transitions) -----

    async fn upsert_book(&self, book: &Book) -> StoreResult<()>;
    async fn fetch_book(&self, id: Uuid) -> StoreResult<Option<Book>>;
    async fn list_books(&self) -> StoreResult<Vec<Book>>;
    async fn update_book_status(&self, id: Uuid, status: BookStatus) -> StoreResult<()>;
    /// Atomically apply a signed exposure delta to one book. Serialised per
    /// book by the store.
    async fn apply_book_exposure_delta(&self, id: Uuid, delta: f64) -> StoreResult<()>;

    // -- venues -------------------------------------------------------------

    async fn upsert_venue(&self, venue: &VenueRow) -> StoreResult<()>;
    async fn fetch_venue(&self, id: Uuid) -> StoreResult<Option<VenueRow>>;
    async fn venue_by_name(&self, name: &str) -> StoreResult<Option<VenueRow>>;
    async fn list_venues(&self) -> StoreResult<Vec<VenueRow>>;
    async fn record_venue_health(&self, health: &VenueHealth) -> StoreResult<()>;

    // -- instruments --------------------------------------------------------

    async fn upsert_instrument(&self, row: &InstrumentRow) -> StoreResult<()>;
    async fn instrument_by_symbol(
        &self,
        tenant_id: &str,
        common_symbol: &str,
    ) -> StoreResult<Option<InstrumentRow>>;
    async fn instruments_for_venue(&self, venue_id: Uuid) -> StoreResult<Vec<InstrumentRow>>;

    // -- strategies + allocator tables --------------------------------------

    async fn upsert_strategy(&self, row: &StrategyRow) -> StoreResult<()>;
    async fn list_strategies(&self, tenant_id: &str) -> StoreResult<Vec<StrategyRow>>;
    async fn fetch_strategy(&self, id: Uuid) -> StoreResult<Option<StrategyRow>>;
    async fn set_strategy_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<()>;

    async fn upsert_allocation(&self, row: &AllocationRow) -> StoreResult<()>;
    async fn allocation_map(&self, tenant_id: &str) -> StoreResult<Vec<AllocationRow>>;

    async fn record_performance(&self, row: &PerformanceRow) -> StoreResult<()>;
    /// Latest performance row per strategy.
    async fn latest_performance(&self, tenant_id: &str) -> StoreResult<Vec<PerformanceRow>>;

    async fn record_risk_metrics(&self, row: &RiskMetricsRow) -> StoreResult<()>;
    /// Latest risk-metrics row per strategy.
    async fn latest_risk_metrics(&self, tenant_id: &str) -> StoreResult<Vec<RiskMetricsRow>>;

    async fn record_allocator_decision(&self, row: &AllocatorDecisionRow) -> StoreResult<()>;
    async fn latest_allocator_decision(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<AllocatorDecisionRow>>;

    async fn record_regime(&self, row: &RegimeRow) -> StoreResult<()>;

    // -- basis strategy-position view ---------------------------------------

    /// Apply a signed size delta to the spot or deriv side of one
    /// `(strategy, instrument)` and recompute `hedged_ratio = |spot|/|deriv|`
    /// (0 when deriv is flat).
    async fn apply_strategy_position_delta(
        &self,
        tenant_id: &str,
        strategy_id: Uuid,
        instrument_id: Uuid,
        venue_type: &str,
        size_delta: f64,
    ) -> StoreResult<StrategyPositionRow>;
    async fn list_strategy_positions(&self, tenant_id: &str)
        -> StoreResult<Vec<StrategyPositionRow>>;

    // -- venue inventory ----------------------------------------------------

    async fn upsert_inventory(&self, row: &InventoryRow) -> StoreResult<()>;
    async fn inventory_for_venue(
        &self,
        tenant_id: &str,
        venue_id: Uuid,
    ) -> StoreResult<Vec<InventoryRow>>;

    // -- multi-leg intents --------------------------------------------------

    async fn insert_multi_leg_intent(&self, row: &MultiLegIntentRow) -> StoreResult<()>;
    async fn update_multi_leg_status(&self, intent_id: Uuid, status: &str) -> StoreResult<()>;
    async fn fetch_multi_leg_intent(
        &self,
        intent_id: Uuid,
    ) -> StoreResult<Option<MultiLegIntentRow>>;
    async fn insert_leg_event(&self, row: &LegEventRow) -> StoreResult<()>;
    async fn leg_events_for_intent(&self, intent_id: Uuid) -> StoreResult<Vec<LegEventRow>>;

    // -- audit + alerts -----------------------------------------------------

    async fn audit_log(&self, record: &AuditRecord) -> StoreResult<()>;
    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditRecord>>;
    async fn create_alert(&self, alert: &Alert) -> StoreResult<()>;
    async fn recent_alerts(&self, limit: usize) -> StoreResult<Vec<Alert>>;

    // -- kill switch --------------------------------------------------------

    /// Returns the active reason when the global switch or the book-scoped
    /// switch is set. The global switch dominates.
    async fn kill_switch(&self, book_id: Option<Uuid>) -> StoreResult<Option<String>>;
    async fn set_kill_switch(
        &self,
        book_id: Option<Uuid>,
        active: bool,
        reason: &str,
    ) -> StoreResult<()>;
}
