//! Row types for tables that have no richer domain counterpart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cxd_domain::VenueStatus;

/// `venues` table row: identity plus last recorded health.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenueRow {
    pub id: Uuid,
    pub name: String,
    /// `"spot"` or `"deriv"`.
    pub venue_type: String,
    pub status: VenueStatus,
    pub latency_ms: i64,
    pub error_rate: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub is_enabled: bool,
    pub supported_instruments: Vec<String>,
}

impl VenueRow {
    pub fn new(name: impl Into<String>, venue_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            venue_type: venue_type.into(),
            status: VenueStatus::Healthy,
            latency_ms: 0,
            error_rate: 0.0,
            last_heartbeat: Utc::now(),
            is_enabled: true,
            supported_instruments: Vec::new(),
        }
    }
}

/// `instruments` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub venue_id: Uuid,
    pub venue_symbol: String,
    pub common_symbol: String,
}

/// `strategies` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub strategy_type: String,
    pub enabled: bool,
    pub max_notional: f64,
    pub min_notional: f64,
    pub capacity_estimate: f64,
    pub book_id: Option<Uuid>,
    pub parameters: Value,
    pub created_at: DateTime<Utc>,
}

/// `strategy_allocations` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub tenant_id: String,
    pub strategy_id: Uuid,
    pub allocated_capital: f64,
    pub allocation_pct: f64,
    pub leverage_cap: f64,
    pub risk_multiplier: f64,
    pub updated_at: DateTime<Utc>,
}

/// `strategy_performance` table row (one per refresh window).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRow {
    pub tenant_id: String,
    pub strategy_id: Uuid,
    /// Window label, e.g. `"30d"`.
    pub window: String,
    pub pnl: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub turnover: f64,
    pub ts: DateTime<Utc>,
}

/// `strategy_risk_metrics` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskMetricsRow {
    pub tenant_id: String,
    pub strategy_id: Uuid,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub var_estimate: f64,
    pub stress_loss_estimate: f64,
    pub correlation_cluster: Option<String>,
    pub ts: DateTime<Utc>,
}

/// `strategy_positions` table row — the basis spot/deriv hedge view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyPositionRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub strategy_id: Uuid,
    pub instrument_id: Uuid,
    pub spot_position: f64,
    pub deriv_position: f64,
    /// `|spot| / |deriv|`; 0 when the deriv leg is flat.
    pub hedged_ratio: f64,
    pub updated_at: DateTime<Utc>,
}

/// `venue_inventory` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub tenant_id: String,
    pub venue_id: Uuid,
    pub instrument_id: Uuid,
    pub available_qty: f64,
}

/// `multi_leg_intents` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiLegIntentRow {
    pub tenant_id: String,
    pub intent_id: Uuid,
    /// Serialised execution plan plus the intent notional.
    pub legs_json: Value,
    pub execution_mode: String,
    /// `open | filled | failed | unwound`.
    pub status: String,
}

/// `leg_events` table row — the per-leg audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegEventRow {
    pub tenant_id: String,
    pub intent_id: Uuid,
    pub leg_id: Uuid,
    /// `leg_submitted | leg_executed | leg_failed | leg_rejected |
    /// unwind_submitted`.
    pub event_type: String,
    pub payload_json: Value,
    pub ts: DateTime<Utc>,
}

/// `allocator_decisions` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocatorDecisionRow {
    pub tenant_id: String,
    pub decision_id: Uuid,
    pub regime_state: Value,
    pub allocation_snapshot: Value,
    pub rationale: Value,
    pub ts: DateTime<Utc>,
}

/// `market_regimes` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegimeRow {
    pub tenant_id: String,
    pub direction: String,
    pub volatility: String,
    pub liquidity: String,
    pub risk_bias: String,
    pub details: Value,
    pub ts: DateTime<Utc>,
}
