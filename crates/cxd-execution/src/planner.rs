//! Execution planner: run a one- or multi-leg plan with legging discipline
//! and unwind-on-fail.
//!
//! Per leg: resolve the adapter, check the inter-leg time budget, submit,
//! persist via the OMS save path, and record the leg event. Any failure
//! aborts the plan; when `unwind_on_fail` is set, every already-filled leg
//! gets an opposite-side market order of `max(filled_size, size)`. Unwind
//! failures are alerted but never block the remaining unwinds.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use cxd_domain::{
    Alert, AuditRecord, ExecutionLeg, ExecutionPlan, Order, OrderStatus, OrderType, Severity,
    TradeIntent,
};
use cxd_store::{LegEventRow, Store};
use cxd_venues::VenueRegistry;

/// Planner over the shared store and adapter registry.
#[derive(Clone)]
pub struct ExecutionPlanner {
    store: Arc<dyn Store>,
    tenant_id: String,
}

impl ExecutionPlanner {
    pub fn new(store: Arc<dyn Store>, tenant_id: impl Into<String>) -> Self {
        Self {
            store,
            tenant_id: tenant_id.into(),
        }
    }

    /// Build the implicit single-leg plan the OMS uses for plain intents.
    pub fn single_leg_plan(intent: &TradeIntent, venue: &str, size: f64) -> ExecutionPlan {
        ExecutionPlan::single(
            ExecutionLeg::market(venue, intent.instrument.clone(), intent.direction)
                .with_size(size),
        )
    }

    /// Execute all legs of `plan`. Returns the executed orders, or an empty
    /// vector when the plan aborted (after unwinding if configured).
    pub async fn execute_plan(
        &self,
        intent: &TradeIntent,
        plan: &ExecutionPlan,
        registry: &VenueRegistry,
    ) -> Vec<Order> {
        if plan.is_unsupported_atomic() {
            self.record_action(
                intent,
                "atomic_not_supported",
                "atomic execution is not supported for multi-leg plans",
                Severity::Warning,
            )
            .await;
            return Vec::new();
        }

        let mut executed: Vec<(Order, String)> = Vec::new();
        let mut last_leg_time: Option<Instant> = None;

        for leg in &plan.legs {
            let adapter = match registry.get(&leg.venue) {
                Some(a) => a,
                None => {
                    self.record_action(
                        intent,
                        "leg_missing_adapter",
                        &format!("missing adapter for {}", leg.venue),
                        Severity::Warning,
                    )
                    .await;
                    return self.unwind_if_needed(intent, plan, executed, registry).await;
                }
            };

            // Legging discipline: the gap between consecutive submissions
            // must stay inside the plan's time budget.
            if let Some(prev) = last_leg_time {
                let gap_ms = prev.elapsed().as_millis() as i64;
                if gap_ms > plan.max_time_between_legs_ms {
                    self.record_action(
                        intent,
                        "leg_time_exceeded",
                        &format!("exceeded max leg interval ({gap_ms} ms)"),
                        Severity::Warning,
                    )
                    .await;
                    return self.unwind_if_needed(intent, plan, executed, registry).await;
                }
            }

            let venue_id = match self.store.venue_by_name(&leg.venue).await {
                Ok(Some(row)) => Some(row.id),
                _ => None,
            };

            let mut order = Order::new(
                intent.book_id,
                Some(intent.strategy_id),
                venue_id,
                leg.instrument.clone(),
                leg.side,
                leg.size,
                leg.order_type,
                leg.limit_price,
            );
            if leg.order_type == OrderType::Market {
                order.price = None;
            }

            self.record_leg_event(intent, leg, "leg_submitted", serde_json::json!({}))
                .await;

            let leg_start = Instant::now();
            let placed = adapter.place_order(order.clone()).await;

            match placed {
                Err(e) => {
                    error!(error = %e, venue = %leg.venue, "leg_execution_failed");
                    self.record_leg_event(
                        intent,
                        leg,
                        "leg_failed",
                        serde_json::json!({ "error": e.to_string() }),
                    )
                    .await;
                    return self.unwind_if_needed(intent, plan, executed, registry).await;
                }
                Ok(mut filled) => {
                    filled.latency_ms = Some(leg_start.elapsed().as_millis() as i64);
                    filled.updated_at = Utc::now();

                    if let Err(e) = self.store.upsert_order(&filled).await {
                        error!(error = %e, order_id = %filled.id, "leg_persist_failed");
                    }
                    last_leg_time = Some(Instant::now());

                    self.record_leg_event(
                        intent,
                        leg,
                        "leg_executed",
                        serde_json::json!({
                            "status": filled.status.as_str(),
                            "filled_size": filled.filled_size,
                            "filled_price": filled.filled_price,
                        }),
                    )
                    .await;

                    let rejected = matches!(
                        filled.status,
                        OrderStatus::Rejected | OrderStatus::Cancelled
                    );
                    executed.push((filled, leg.venue.clone()));

                    if rejected {
                        self.record_leg_event(intent, leg, "leg_rejected", serde_json::json!({}))
                            .await;
                        return self.unwind_if_needed(intent, plan, executed, registry).await;
                    }
                }
            }
        }

        info!(intent_id = %intent.id, legs = executed.len(), "plan_executed");
        executed.into_iter().map(|(o, _)| o).collect()
    }

    /// Flatten already-executed legs after a failure. Rejected legs have no
    /// fill to flatten and are skipped.
    async fn unwind_if_needed(
        &self,
        intent: &TradeIntent,
        plan: &ExecutionPlan,
        executed: Vec<(Order, String)>,
        registry: &VenueRegistry,
    ) -> Vec<Order> {
        if !plan.unwind_on_fail || executed.is_empty() {
            return Vec::new();
        }

        self.record_action(
            intent,
            "unwind_triggered",
            "unwinding executed legs after failure",
            Severity::Critical,
        )
        .await;

        for (order, venue) in &executed {
            if matches!(order.status, OrderStatus::Rejected | OrderStatus::Cancelled) {
                continue;
            }
            let adapter = match registry.get(venue) {
                Some(a) => a,
                None => continue,
            };

            let unwind_size = order.filled_size.max(order.size);
            let unwind = Order::new(
                order.book_id,
                order.strategy_id,
                order.venue_id,
                order.instrument.clone(),
                order.side.opposite(),
                unwind_size,
                OrderType::Market,
                None,
            );

            let leg = ExecutionLeg::market(venue.clone(), order.instrument.clone(), unwind.side)
                .with_size(unwind_size);
            self.record_leg_event(
                intent,
                &leg,
                "unwind_submitted",
                serde_json::json!({ "unwinds_order": order.id }),
            )
            .await;

            match adapter.place_order(unwind).await {
                Ok(done) => {
                    if let Err(e) = self.store.upsert_order(&done).await {
                        error!(error = %e, order_id = %done.id, "unwind_persist_failed");
                    }
                }
                Err(e) => {
                    // Logged and alerted, but the remaining unwinds proceed.
                    error!(error = %e, order_id = %order.id, "unwind_failed");
                    let _ = self
                        .store
                        .create_alert(&Alert::new(
                            "Unwind Failed",
                            format!("unwind of order {} on {} failed: {e}", order.id, venue),
                            Severity::Critical,
                            "execution_planner",
                        ))
                        .await;
                }
            }
        }

        Vec::new()
    }

    async fn record_leg_event(
        &self,
        intent: &TradeIntent,
        leg: &ExecutionLeg,
        event_type: &str,
        mut payload: serde_json::Value,
    ) {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                "intent_id".to_string(),
                serde_json::Value::String(intent.id.to_string()),
            );
            obj.insert(
                "venue".to_string(),
                serde_json::Value::String(leg.venue.clone()),
            );
        }
        let row = LegEventRow {
            tenant_id: self.tenant_id.clone(),
            intent_id: intent.id,
            leg_id: leg.id,
            event_type: event_type.to_string(),
            payload_json: payload,
            ts: Utc::now(),
        };
        if let Err(e) = self.store.insert_leg_event(&row).await {
            warn!(error = %e, event_type, "leg_event_record_failed");
        }
    }

    async fn record_action(
        &self,
        intent: &TradeIntent,
        action: &str,
        message: &str,
        severity: Severity,
    ) {
        let _ = self
            .store
            .create_alert(
                &Alert::new(
                    format!("Execution Planner: {action}"),
                    message.to_string(),
                    severity,
                    "execution_planner",
                )
                .with_metadata(serde_json::json!({ "intent_id": intent.id })),
            )
            .await;
        let _ = self
            .store
            .audit_log(
                &AuditRecord::new(action, "trade_intent", intent.id.to_string())
                    .with_book(intent.book_id)
                    .with_severity(severity)
                    .with_after(serde_json::json!({ "message": message })),
            )
            .await;
    }
}

// Unit-level checks live here; the cross-venue unwind scenarios are in
// tests/scenario_unwind_on_leg_failure.rs.
#[cfg(test)]
mod tests {
    use super::*;
    use cxd_domain::Side;
    use uuid::Uuid;

    #[test]
    fn single_leg_plan_carries_intent_shape() {
        let intent = TradeIntent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "BTC-USD",
            Side::Buy,
            1_000.0,
            20.0,
            60,
            0.7,
        );
        let plan = ExecutionPlanner::single_leg_plan(&intent, "coinbase", 0.02);
        assert_eq!(plan.legs.len(), 1);
        assert_eq!(plan.legs[0].size, 0.02);
        assert_eq!(plan.legs[0].side, Side::Buy);
        assert!(plan.unwind_on_fail);
    }
}
