//! Operator commands: order cancel and kill-switch control.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use uuid::Uuid;

use cxd_config::{AllocatorConfig, EngineConfig, StrategyConfigDoc};
use cxd_marketdata::NoopPublisher;
use cxd_risk::{CircuitBreakers, RiskConfig, RiskEngine};
use cxd_store::{PgStore, Store};
use cxd_supervisor::services::build_services;

#[derive(Args)]
pub struct CancelOrderArgs {
    /// Internal order id.
    #[arg(long)]
    pub order_id: Uuid,

    /// Venue name the order routes to.
    #[arg(long)]
    pub venue: String,

    /// Engine config (adapters are built from it).
    #[arg(long)]
    pub engine_config: String,

    /// Strategies document (registry wiring).
    #[arg(long)]
    pub strategies: String,

    /// Allocator config document.
    #[arg(long)]
    pub allocator_config: String,
}

pub async fn cancel_order(args: CancelOrderArgs) -> Result<()> {
    let engine_config = EngineConfig::load(&args.engine_config)?;
    let strategy_doc = StrategyConfigDoc::load(&args.strategies)?;
    let allocator_config = AllocatorConfig::load(&args.allocator_config)?;

    let store = PgStore::connect_from_env()
        .await
        .context("connect to Postgres")?;
    let services = build_services(
        engine_config,
        strategy_doc,
        allocator_config,
        Arc::new(store) as Arc<dyn Store>,
        Arc::new(NoopPublisher),
    )
    .await?;

    let cancelled = services.oms.cancel_order(args.order_id, &args.venue).await?;
    println!("order_id={} cancelled={}", args.order_id, cancelled);
    if !cancelled {
        anyhow::bail!("cancel not confirmed for order {}", args.order_id);
    }
    Ok(())
}

#[derive(Args)]
pub struct KillSwitchArgs {
    /// Scope to one book; global when omitted.
    #[arg(long)]
    pub book_id: Option<Uuid>,

    /// Clear instead of activate.
    #[arg(long, default_value_t = false)]
    pub deactivate: bool,

    #[arg(long, default_value = "manual activation")]
    pub reason: String,
}

pub async fn kill_switch(args: KillSwitchArgs) -> Result<()> {
    let store = PgStore::connect_from_env()
        .await
        .context("connect to Postgres")?;
    let risk = RiskEngine::new(
        Arc::new(store) as Arc<dyn Store>,
        Arc::new(CircuitBreakers::new()),
        RiskConfig::default(),
    );

    let scope = args
        .book_id
        .map(|b| b.to_string())
        .unwrap_or_else(|| "global".to_string());
    if args.deactivate {
        risk.deactivate_kill_switch(args.book_id).await?;
        println!("kill_switch=inactive scope={scope}");
    } else {
        risk.activate_kill_switch(args.book_id, &args.reason).await?;
        println!("kill_switch=active scope={scope} reason={}", args.reason);
    }
    Ok(())
}
