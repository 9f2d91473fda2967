use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueStatus {
    Healthy,
    Degraded,
    Offline,
}

impl VenueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VenueStatus::Healthy => "healthy",
            VenueStatus::Degraded => "degraded",
            VenueStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<VenueStatus> {
        match s {
            "healthy" => Some(VenueStatus::Healthy),
            "degraded" => Some(VenueStatus::Degraded),
            "offline" => Some(VenueStatus::Offline),
            _ => None,
        }
    }
}

/// Point-in-time health of a venue connection, as reported by the adapter's
/// `health_check` and persisted by the health tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenueHealth {
    pub venue_id: Uuid,
    pub name: String,
    pub status: VenueStatus,
    pub latency_ms: i64,
    /// Rolling error rate in percent, derived from consecutive failures.
    pub error_rate: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub is_enabled: bool,
    pub supported_instruments: Vec<String>,
}

impl VenueHealth {
    pub fn healthy(venue_id: Uuid, name: impl Into<String>, latency_ms: i64) -> Self {
        Self {
            venue_id,
            name: name.into(),
            status: VenueStatus::Healthy,
            latency_ms,
            error_rate: 0.0,
            last_heartbeat: Utc::now(),
            is_enabled: true,
            supported_instruments: Vec::new(),
        }
    }
}
