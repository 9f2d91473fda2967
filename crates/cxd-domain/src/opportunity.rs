use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market::DataQuality;
use crate::order::Side;
use crate::plan::ExecutionPlan;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityType {
    Spot,
    Futures,
    Arbitrage,
}

impl OpportunityType {
    pub fn as_str(self) -> &'static str {
        match self {
            OpportunityType::Spot => "spot",
            OpportunityType::Futures => "futures",
            OpportunityType::Arbitrage => "arbitrage",
        }
    }
}

/// Per-timeframe trend classification emitted by the directional scanner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

/// Multi-timeframe signal stack backing a directional opportunity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalStack {
    pub fast_timeframe: String,
    pub medium_timeframe: String,
    pub slow_timeframe: String,
    pub fast_direction: TrendDirection,
    pub medium_direction: TrendDirection,
    pub slow_direction: TrendDirection,
    pub confidence: f64,
    pub expected_edge_bps: f64,
    pub explanation: String,
}

/// A scanner-ranked trade candidate, possibly carrying a pre-shaped
/// multi-leg execution plan (arbitrage).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub opportunity_type: OpportunityType,
    pub instrument: String,
    pub direction: Side,
    pub venue: String,
    pub confidence: f64,
    pub expected_edge_bps: f64,
    pub horizon_minutes: i64,
    pub data_quality: DataQuality,
    pub signal_stack: Option<SignalStack>,
    pub execution_plan: Option<ExecutionPlan>,
    pub explanation: String,
    /// Originating strategy name; used to route the opportunity back to its
    /// book when converting to an intent.
    pub strategy_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Opportunity {
    /// Ranking score: expected edge weighted by confidence.
    pub fn score(&self) -> f64 {
        self.expected_edge_bps * self.confidence
    }
}
