//! Risk engine: ordered gate chain over trade intents, circuit breakers,
//! and kill-switch control.
//!
//! Gates run in a fixed order and the first failure rejects:
//!
//! 1. kill switch (global or book-scoped, read from the store)
//! 2. circuit breakers (process-wide flags; any active breaker blocks new
//!    opening risk)
//! 3. book status (`halted` rejects; `reduce_only` passes only reducing
//!    intents)
//! 4. per-intent exposure cap
//! 5. book exposure cap
//! 6. venue health (`offline` rejects; `degraded` halves size)
//! 7. correlation cluster cap
//!
//! The result carries every reason and failed check so the OMS can audit
//! the decision verbatim.

pub mod breakers;

pub use breakers::{BreakerState, CircuitBreakers};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use cxd_domain::{
    Alert, AuditRecord, Book, BookStatus, Position, Severity, TradeIntent, VenueStatus,
};
use cxd_portfolio::is_reducing;
use cxd_store::{Store, StoreResult, VenueRow};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskDecision {
    Approve,
    Reject,
}

/// Outcome of the gate chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub decision: RiskDecision,
    pub reasons: Vec<String>,
    pub checks_failed: Vec<String>,
    /// Multiplier the OMS applies to the sized position (0.5 on a degraded
    /// venue, otherwise 1.0).
    pub size_factor: f64,
}

impl RiskCheckResult {
    fn approve(size_factor: f64) -> Self {
        Self {
            decision: RiskDecision::Approve,
            reasons: Vec::new(),
            checks_failed: Vec::new(),
            size_factor,
        }
    }

    fn reject(check: &str, reason: String) -> Self {
        Self {
            decision: RiskDecision::Reject,
            reasons: vec![reason],
            checks_failed: vec![check.to_string()],
            size_factor: 0.0,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.decision == RiskDecision::Approve
    }
}

// ---------------------------------------------------------------------------
// Config + context
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RiskConfig {
    /// Global scalar on the per-intent cap.
    pub risk_multiplier: f64,
    /// Size factor applied when the venue is degraded.
    pub degraded_size_factor: f64,
    /// Max gross exposure per correlation cluster, USD.
    pub cluster_caps: BTreeMap<String, f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_multiplier: 1.0,
            degraded_size_factor: 0.5,
            cluster_caps: BTreeMap::new(),
        }
    }
}

/// Everything the gate chain needs besides the intent itself. The OMS
/// assembles this from the store before calling in.
#[derive(Clone, Debug)]
pub struct RiskContext {
    pub book: Book,
    pub venue: Option<VenueRow>,
    pub positions: Vec<Position>,
    /// From the strategy definition driving this intent.
    pub max_risk_per_trade: f64,
    /// Correlation cluster of the strategy, if any.
    pub cluster: Option<String>,
    /// Precomputed gross exposure per cluster, USD.
    pub cluster_exposures: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RiskEngine {
    store: Arc<dyn Store>,
    breakers: Arc<CircuitBreakers>,
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(store: Arc<dyn Store>, breakers: Arc<CircuitBreakers>, config: RiskConfig) -> Self {
        Self {
            store,
            breakers,
            config,
        }
    }

    pub fn breakers(&self) -> Arc<CircuitBreakers> {
        Arc::clone(&self.breakers)
    }

    /// Run the full gate chain.
    pub async fn check_intent(
        &self,
        intent: &TradeIntent,
        ctx: &RiskContext,
    ) -> StoreResult<RiskCheckResult> {
        // 1. Kill switch.
        if let Some(reason) = self.store.kill_switch(Some(intent.book_id)).await? {
            return Ok(RiskCheckResult::reject(
                "kill_switch",
                format!("kill switch active: {reason}"),
            ));
        }

        // 2. Circuit breakers: any active breaker blocks new opening risk.
        let active = self.breakers.active_names();
        if !active.is_empty() && !is_reducing(intent, &ctx.positions) {
            return Ok(RiskCheckResult::reject(
                "circuit_breaker",
                format!("circuit breakers active: {}", active.join(", ")),
            ));
        }

        // 3. Book status.
        match ctx.book.status {
            BookStatus::Halted => {
                return Ok(RiskCheckResult::reject(
                    "book_status",
                    format!("book {} is halted", ctx.book.name),
                ));
            }
            BookStatus::ReduceOnly => {
                if !is_reducing(intent, &ctx.positions) {
                    return Ok(RiskCheckResult::reject(
                        "book_status",
                        format!("book {} is reduce-only and intent does not reduce", ctx.book.name),
                    ));
                }
            }
            BookStatus::Active => {}
        }

        // 4. Per-intent exposure cap.
        let intent_cap =
            ctx.book.capital_allocated * ctx.max_risk_per_trade * self.config.risk_multiplier;
        if intent.target_exposure_usd > intent_cap {
            return Ok(RiskCheckResult::reject(
                "intent_exposure_cap",
                format!(
                    "intent exposure {:.2} exceeds cap {:.2}",
                    intent.target_exposure_usd, intent_cap
                ),
            ));
        }

        // 5. Book exposure cap.
        let projected = ctx.book.current_exposure + intent.target_exposure_usd;
        if projected > ctx.book.max_exposure {
            return Ok(RiskCheckResult::reject(
                "book_exposure_cap",
                format!(
                    "projected book exposure {:.2} exceeds max {:.2}",
                    projected, ctx.book.max_exposure
                ),
            ));
        }

        // 6. Venue health.
        let mut size_factor = 1.0;
        if let Some(venue) = &ctx.venue {
            match venue.status {
                VenueStatus::Offline => {
                    return Ok(RiskCheckResult::reject(
                        "venue_health",
                        format!("venue {} is offline", venue.name),
                    ));
                }
                VenueStatus::Degraded => {
                    size_factor = self.config.degraded_size_factor;
                }
                VenueStatus::Healthy => {}
            }
            if !venue.is_enabled {
                return Ok(RiskCheckResult::reject(
                    "venue_health",
                    format!("venue {} is disabled", venue.name),
                ));
            }
        }

        // 7. Correlation cluster cap.
        if let Some(cluster) = &ctx.cluster {
            if let Some(cap) = self.config.cluster_caps.get(cluster) {
                let current = ctx.cluster_exposures.get(cluster).copied().unwrap_or(0.0);
                if current + intent.target_exposure_usd > *cap {
                    return Ok(RiskCheckResult::reject(
                        "cluster_cap",
                        format!(
                            "cluster {cluster} exposure {:.2} + {:.2} exceeds cap {:.2}",
                            current, intent.target_exposure_usd, cap
                        ),
                    ));
                }
            }
        }

        Ok(RiskCheckResult::approve(size_factor))
    }

    /// Activate the kill switch (global when `book_id` is `None`), with
    /// alert and audit.
    pub async fn activate_kill_switch(
        &self,
        book_id: Option<Uuid>,
        reason: &str,
    ) -> StoreResult<()> {
        self.store.set_kill_switch(book_id, true, reason).await?;
        warn!(book_id = ?book_id, reason, "kill_switch_activated");

        let scope = book_id
            .map(|b| b.to_string())
            .unwrap_or_else(|| "global".to_string());
        self.store
            .create_alert(
                &Alert::new(
                    "Kill Switch Activated",
                    format!("scope={scope}: {reason}"),
                    Severity::Critical,
                    "risk_engine",
                )
                .with_metadata(serde_json::json!({ "scope": scope })),
            )
            .await?;
        let mut record = AuditRecord::new("kill_switch_activated", "kill_switch", scope)
            .with_severity(Severity::Critical)
            .with_after(serde_json::json!({ "reason": reason }));
        record.book_id = book_id;
        self.store.audit_log(&record).await?;
        Ok(())
    }

    /// Operator path: clear the kill switch.
    pub async fn deactivate_kill_switch(&self, book_id: Option<Uuid>) -> StoreResult<()> {
        self.store.set_kill_switch(book_id, false, "").await?;
        let scope = book_id
            .map(|b| b.to_string())
            .unwrap_or_else(|| "global".to_string());
        self.store
            .audit_log(
                &AuditRecord::new("kill_switch_deactivated", "kill_switch", scope)
                    .with_severity(Severity::Warning),
            )
            .await?;
        Ok(())
    }

    /// Flip a named circuit breaker on, with alert and audit.
    pub async fn activate_circuit_breaker(
        &self,
        name: &str,
        source: &str,
        reason: &str,
    ) -> StoreResult<()> {
        self.breakers.activate(name, source, reason);
        warn!(breaker = name, source, reason, "circuit_breaker_activated");
        self.store
            .create_alert(&Alert::new(
                format!("Circuit Breaker: {name}"),
                reason.to_string(),
                Severity::Critical,
                source,
            ))
            .await?;
        self.store
            .audit_log(
                &AuditRecord::new("circuit_breaker_activated", "circuit_breaker", name)
                    .with_severity(Severity::Critical)
                    .with_after(serde_json::json!({ "source": source, "reason": reason })),
            )
            .await?;
        Ok(())
    }

    /// Operator path: clear a breaker.
    pub async fn deactivate_circuit_breaker(&self, name: &str) -> StoreResult<()> {
        self.breakers.deactivate(name);
        self.store
            .audit_log(
                &AuditRecord::new("circuit_breaker_deactivated", "circuit_breaker", name)
                    .with_severity(Severity::Warning),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxd_domain::Side;
    use cxd_store::MemStore;

    fn engine_with(config: RiskConfig) -> (RiskEngine, Arc<MemStore>) {
        let store = Arc::new(MemStore::new());
        let engine = RiskEngine::new(
            store.clone(),
            Arc::new(CircuitBreakers::new()),
            config,
        );
        (engine, store)
    }

    fn ctx(book: Book) -> RiskContext {
        RiskContext {
            book,
            venue: None,
            positions: Vec::new(),
            max_risk_per_trade: 0.01,
            cluster: None,
            cluster_exposures: BTreeMap::new(),
        }
    }

    fn intent(book_id: Uuid, exposure: f64) -> TradeIntent {
        TradeIntent::new(
            book_id,
            Uuid::new_v4(),
            "BTC-USD",
            Side::Buy,
            exposure,
            exposure * 0.02,
            60,
            0.7,
        )
    }

    #[tokio::test]
    async fn happy_path_approves_full_size() {
        let (engine, _store) = engine_with(RiskConfig::default());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        let result = engine
            .check_intent(&intent(book.id, 1_000.0), &ctx(book))
            .await
            .unwrap();
        assert!(result.is_approved());
        assert_eq!(result.size_factor, 1.0);
    }

    #[tokio::test]
    async fn kill_switch_blocks_everything_first() {
        let (engine, store) = engine_with(RiskConfig::default());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        store
            .set_kill_switch(None, true, "manual halt")
            .await
            .unwrap();

        let result = engine
            .check_intent(&intent(book.id, 1_000.0), &ctx(book))
            .await
            .unwrap();
        assert!(!result.is_approved());
        assert_eq!(result.checks_failed, vec!["kill_switch"]);
    }

    #[tokio::test]
    async fn intent_cap_uses_capital_times_risk() {
        let (engine, _store) = engine_with(RiskConfig::default());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        // cap = 100_000 * 0.01 = 1_000
        let result = engine
            .check_intent(&intent(book.id, 1_500.0), &ctx(book))
            .await
            .unwrap();
        assert!(!result.is_approved());
        assert_eq!(result.checks_failed, vec!["intent_exposure_cap"]);
    }

    #[tokio::test]
    async fn book_cap_counts_current_exposure() {
        let (engine, _store) = engine_with(RiskConfig::default());
        let mut book = Book::new("alpha", "alpha", 100_000.0, 1_200.0);
        book.current_exposure = 500.0;
        let result = engine
            .check_intent(&intent(book.id, 1_000.0), &ctx(book))
            .await
            .unwrap();
        assert!(!result.is_approved());
        assert_eq!(result.checks_failed, vec!["book_exposure_cap"]);
    }

    #[tokio::test]
    async fn degraded_venue_halves_size() {
        let (engine, _store) = engine_with(RiskConfig::default());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        let mut c = ctx(book);
        let mut venue = VenueRow::new("coinbase", "spot");
        venue.status = VenueStatus::Degraded;
        c.venue = Some(venue);

        let result = engine
            .check_intent(&intent(c.book.id, 1_000.0), &c)
            .await
            .unwrap();
        assert!(result.is_approved());
        assert_eq!(result.size_factor, 0.5);
    }

    #[tokio::test]
    async fn offline_venue_rejects() {
        let (engine, _store) = engine_with(RiskConfig::default());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        let mut c = ctx(book);
        let mut venue = VenueRow::new("coinbase", "spot");
        venue.status = VenueStatus::Offline;
        c.venue = Some(venue);

        let result = engine
            .check_intent(&intent(c.book.id, 1_000.0), &c)
            .await
            .unwrap();
        assert!(!result.is_approved());
        assert_eq!(result.checks_failed, vec!["venue_health"]);
    }

    #[tokio::test]
    async fn cluster_cap_rejects_overweight() {
        let mut config = RiskConfig::default();
        config.cluster_caps.insert("majors".to_string(), 2_000.0);
        let (engine, _store) = engine_with(config);
        let book = Book::new("alpha", "alpha", 200_000.0, 50_000.0);
        let mut c = ctx(book);
        c.cluster = Some("majors".to_string());
        c.cluster_exposures.insert("majors".to_string(), 1_500.0);

        let result = engine
            .check_intent(&intent(c.book.id, 1_000.0), &c)
            .await
            .unwrap();
        assert!(!result.is_approved());
        assert_eq!(result.checks_failed, vec!["cluster_cap"]);
    }

    #[tokio::test]
    async fn reduce_only_book_passes_reducing_intents() {
        let (engine, _store) = engine_with(RiskConfig::default());
        let mut book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        book.status = BookStatus::ReduceOnly;
        let mut c = ctx(book);
        c.positions.push(Position::open(
            c.book.id,
            None,
            "BTC-USD",
            Side::Buy,
            1.0,
            100.0,
        ));

        // Opposite side reduces: approved.
        let mut i = intent(c.book.id, 500.0);
        i.direction = Side::Sell;
        assert!(engine.check_intent(&i, &c).await.unwrap().is_approved());

        // Same side opens more risk: rejected.
        i.direction = Side::Buy;
        let result = engine.check_intent(&i, &c).await.unwrap();
        assert!(!result.is_approved());
        assert_eq!(result.checks_failed, vec!["book_status"]);
    }
}
