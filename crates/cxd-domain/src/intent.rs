use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::order::Side;
use crate::plan::ExecutionPlan;

/// Preferred execution style for fee estimation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStyle {
    Maker,
    Taker,
}

/// One typed metadata payload attached to a trade intent.
///
/// The original system carried an open dict here; downstream gates now
/// consume typed fields only. `Freeform` is the single open map, and nothing
/// in the pipeline branches on its contents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetaEntry {
    /// Strategy-estimated edge, in basis points.
    ExpectedEdge { edge_bps: f64 },
    /// Fee override and/or execution style for the cost gate.
    Fees {
        fee_bps: Option<f64>,
        order_style: Option<OrderStyle>,
    },
    /// Carry terms for perp/basis trades, in basis points.
    Carry {
        funding_rate_bps: f64,
        basis_risk_bps: f64,
    },
    /// Originating strategy identity.
    Strategy {
        name: String,
        strategy_type: String,
    },
    /// Pre-shaped multi-leg execution plan (sized by the OMS).
    Plan(ExecutionPlan),
    /// Allocator stamp applied when the intent was scaled.
    Allocation {
        allocation_pct: f64,
        risk_multiplier: f64,
        decision_id: Uuid,
    },
    /// Open key/value payload for telemetry. Never consumed by gates.
    Freeform(BTreeMap<String, Value>),
}

/// Ordered collection of typed metadata entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentMeta {
    entries: Vec<MetaEntry>,
}

impl IntentMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MetaEntry) {
        self.entries.push(entry);
    }

    pub fn with(mut self, entry: MetaEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[MetaEntry] {
        &self.entries
    }

    pub fn expected_edge_bps(&self) -> Option<f64> {
        self.entries.iter().find_map(|e| match e {
            MetaEntry::ExpectedEdge { edge_bps } => Some(*edge_bps),
            _ => None,
        })
    }

    pub fn fee_bps(&self) -> Option<f64> {
        self.entries.iter().find_map(|e| match e {
            MetaEntry::Fees { fee_bps, .. } => *fee_bps,
            _ => None,
        })
    }

    pub fn order_style(&self) -> Option<OrderStyle> {
        self.entries.iter().find_map(|e| match e {
            MetaEntry::Fees { order_style, .. } => *order_style,
            _ => None,
        })
    }

    pub fn funding_rate_bps(&self) -> f64 {
        self.entries
            .iter()
            .find_map(|e| match e {
                MetaEntry::Carry {
                    funding_rate_bps, ..
                } => Some(*funding_rate_bps),
                _ => None,
            })
            .unwrap_or(0.0)
    }

    pub fn basis_risk_bps(&self) -> f64 {
        self.entries
            .iter()
            .find_map(|e| match e {
                MetaEntry::Carry { basis_risk_bps, .. } => Some(*basis_risk_bps),
                _ => None,
            })
            .unwrap_or(0.0)
    }

    pub fn strategy_type(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            MetaEntry::Strategy { strategy_type, .. } => Some(strategy_type.as_str()),
            _ => None,
        })
    }

    pub fn strategy_name(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            MetaEntry::Strategy { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn execution_plan(&self) -> Option<&ExecutionPlan> {
        self.entries.iter().find_map(|e| match e {
            MetaEntry::Plan(plan) => Some(plan),
            _ => None,
        })
    }

    pub fn allocation(&self) -> Option<(f64, f64, Uuid)> {
        self.entries.iter().find_map(|e| match e {
            MetaEntry::Allocation {
                allocation_pct,
                risk_multiplier,
                decision_id,
            } => Some((*allocation_pct, *risk_multiplier, *decision_id)),
            _ => None,
        })
    }
}

/// A strategy's expression of desire to trade — not yet an order.
///
/// Immutable once the allocator has scaled it: the allocator produces a new
/// value with the `Allocation` stamp rather than mutating in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub id: Uuid,
    pub book_id: Uuid,
    pub strategy_id: Uuid,
    pub instrument: String,
    pub direction: Side,
    pub target_exposure_usd: f64,
    pub max_loss_usd: f64,
    pub invalidation_price: Option<f64>,
    pub horizon_minutes: i64,
    /// Scanner confidence in [0, 1].
    pub confidence: f64,
    pub meta: IntentMeta,
}

impl TradeIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        book_id: Uuid,
        strategy_id: Uuid,
        instrument: impl Into<String>,
        direction: Side,
        target_exposure_usd: f64,
        max_loss_usd: f64,
        horizon_minutes: i64,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            strategy_id,
            instrument: instrument.into(),
            direction,
            target_exposure_usd,
            max_loss_usd,
            invalidation_price: None,
            horizon_minutes,
            confidence: confidence.clamp(0.0, 1.0),
            meta: IntentMeta::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_find_entries() {
        let meta = IntentMeta::new()
            .with(MetaEntry::ExpectedEdge { edge_bps: 25.0 })
            .with(MetaEntry::Carry {
                funding_rate_bps: 8.0,
                basis_risk_bps: 3.0,
            })
            .with(MetaEntry::Strategy {
                name: "btc-trend".into(),
                strategy_type: "spot".into(),
            });

        assert_eq!(meta.expected_edge_bps(), Some(25.0));
        assert_eq!(meta.funding_rate_bps(), 8.0);
        assert_eq!(meta.basis_risk_bps(), 3.0);
        assert_eq!(meta.strategy_type(), Some("spot"));
        assert_eq!(meta.fee_bps(), None);
        assert!(meta.execution_plan().is_none());
    }

    #[test]
    fn missing_carry_defaults_to_zero() {
        let meta = IntentMeta::new();
        assert_eq!(meta.funding_rate_bps(), 0.0);
        assert_eq!(meta.basis_risk_bps(), 0.0);
    }

    #[test]
    fn confidence_is_clamped() {
        let i = TradeIntent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "BTC-USD",
            Side::Buy,
            1_000.0,
            20.0,
            60,
            1.7,
        );
        assert_eq!(i.confidence, 1.0);
    }

    #[test]
    fn meta_serialises_with_kind_tags() {
        let meta = IntentMeta::new().with(MetaEntry::ExpectedEdge { edge_bps: 10.0 });
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"kind\":\"expected_edge\""));
    }
}
