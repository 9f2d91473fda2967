use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{OrderType, Side};

/// How the legs of a plan are executed.
///
/// `Atomic` with more than one leg is unsupported and must be rejected up
/// front by the planner — no venue pair here offers atomic cross-venue
/// execution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Atomic,
    Legged,
}

/// One venue-side order inside a multi-leg execution plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLeg {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub venue: String,
    pub instrument: String,
    pub side: Side,
    /// Zero until the OMS fills in the sized quantity.
    pub size: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub max_slippage_bps: Option<f64>,
    /// Role of the leg for basis strategies, e.g. `"spot"` / `"deriv"`.
    pub leg_type: Option<String>,
}

impl ExecutionLeg {
    pub fn market(venue: impl Into<String>, instrument: impl Into<String>, side: Side) -> Self {
        Self {
            id: Uuid::new_v4(),
            venue: venue.into(),
            instrument: instrument.into(),
            side,
            size: 0.0,
            order_type: OrderType::Market,
            limit_price: None,
            max_slippage_bps: None,
            leg_type: None,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_leg_type(mut self, leg_type: impl Into<String>) -> Self {
        self.leg_type = Some(leg_type.into());
        self
    }

    pub fn with_max_slippage_bps(mut self, bps: f64) -> Self {
        self.max_slippage_bps = Some(bps);
        self
    }
}

/// Execution plan for a trade intent: one or more legs plus the legging
/// discipline limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub mode: ExecutionMode,
    pub legs: Vec<ExecutionLeg>,
    pub max_leg_slippage_bps: f64,
    pub max_time_between_legs_ms: i64,
    pub unwind_on_fail: bool,
}

impl ExecutionPlan {
    pub const DEFAULT_MAX_LEG_SLIPPAGE_BPS: f64 = 10.0;
    pub const DEFAULT_MAX_TIME_BETWEEN_LEGS_MS: i64 = 1_000;

    pub fn legged(legs: Vec<ExecutionLeg>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: ExecutionMode::Legged,
            legs,
            max_leg_slippage_bps: Self::DEFAULT_MAX_LEG_SLIPPAGE_BPS,
            max_time_between_legs_ms: Self::DEFAULT_MAX_TIME_BETWEEN_LEGS_MS,
            unwind_on_fail: true,
        }
    }

    /// Single-leg plan used by the OMS for plain directional intents.
    pub fn single(leg: ExecutionLeg) -> Self {
        Self::legged(vec![leg])
    }

    /// `true` when the plan requests atomic execution over multiple legs,
    /// which no venue supports.
    pub fn is_unsupported_atomic(&self) -> bool {
        self.mode == ExecutionMode::Atomic && self.legs.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_multi_leg_is_flagged() {
        let plan = ExecutionPlan {
            mode: ExecutionMode::Atomic,
            ..ExecutionPlan::legged(vec![
                ExecutionLeg::market("coinbase", "BTC-USD", Side::Buy),
                ExecutionLeg::market("kraken", "BTC-USD", Side::Sell),
            ])
        };
        assert!(plan.is_unsupported_atomic());
    }

    #[test]
    fn single_leg_atomic_is_fine() {
        let plan = ExecutionPlan {
            mode: ExecutionMode::Atomic,
            ..ExecutionPlan::single(ExecutionLeg::market("coinbase", "BTC-USD", Side::Buy))
        };
        assert!(!plan.is_unsupported_atomic());
    }
}
