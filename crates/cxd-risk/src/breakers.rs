//! Process-wide circuit breakers.
//!
//! The one piece of process-wide mutable state that survives the redesign
//! away from module singletons — and it is an explicit, typed, shared
//! object. Any component may activate a breaker; only an operator path
//! deactivates one.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One named breaker's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub active: bool,
    pub source: String,
    pub reason: String,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Named breaker set. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct CircuitBreakers {
    inner: RwLock<BTreeMap<String, BreakerState>>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, name: &str, source: &str, reason: &str) {
        let mut g = self.inner.write().unwrap();
        g.insert(
            name.to_string(),
            BreakerState {
                active: true,
                source: source.to_string(),
                reason: reason.to_string(),
                activated_at: Some(Utc::now()),
                deactivated_at: None,
            },
        );
    }

    pub fn deactivate(&self, name: &str) {
        let mut g = self.inner.write().unwrap();
        if let Some(state) = g.get_mut(name) {
            state.active = false;
            state.deactivated_at = Some(Utc::now());
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        let g = self.inner.read().unwrap();
        g.get(name).map(|s| s.active).unwrap_or(false)
    }

    /// Names of currently active breakers, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let g = self.inner.read().unwrap();
        g.iter()
            .filter(|(_, s)| s.active)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Full snapshot for status surfaces.
    pub fn snapshot(&self) -> BTreeMap<String, BreakerState> {
        self.inner.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_then_deactivate_round_trip() {
        let breakers = CircuitBreakers::new();
        assert!(!breakers.is_active("recon_mismatch"));

        breakers.activate("recon_mismatch", "reconciliation", "3 consecutive mismatches");
        assert!(breakers.is_active("recon_mismatch"));
        assert_eq!(breakers.active_names(), vec!["recon_mismatch"]);

        let snap = breakers.snapshot();
        assert!(snap["recon_mismatch"].activated_at.is_some());
        assert_eq!(snap["recon_mismatch"].source, "reconciliation");

        breakers.deactivate("recon_mismatch");
        assert!(!breakers.is_active("recon_mismatch"));
        assert!(breakers.snapshot()["recon_mismatch"].deactivated_at.is_some());
    }

    #[test]
    fn deactivating_unknown_breaker_is_a_noop() {
        let breakers = CircuitBreakers::new();
        breakers.deactivate("never_set");
        assert!(breakers.active_names().is_empty());
    }
}
