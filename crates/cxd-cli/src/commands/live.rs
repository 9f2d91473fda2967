//! `cxd live`: run the multi-strategy supervisor until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use cxd_config::{AllocatorConfig, EngineConfig, StrategyConfigDoc};
use cxd_marketdata::NoopPublisher;
use cxd_store::{PgStore, Store};
use cxd_supervisor::services::build_services;
use cxd_supervisor::{build_paper_services, Supervisor, SupervisorConfig};

#[derive(Args)]
pub struct LiveArgs {
    /// Engine config document (venues, capital, thresholds).
    #[arg(long)]
    pub engine_config: String,

    /// Strategies + scanner config document.
    #[arg(long)]
    pub strategies: String,

    /// Capital-allocator config document.
    #[arg(long)]
    pub allocator_config: String,

    /// Persist to Postgres (`CXD_DATABASE_URL`) instead of memory.
    #[arg(long, default_value_t = false)]
    pub postgres: bool,
}

pub async fn run_live(args: LiveArgs) -> Result<()> {
    let engine_config = EngineConfig::load(&args.engine_config)?;
    let strategy_doc = StrategyConfigDoc::load(&args.strategies)?;
    let allocator_config = AllocatorConfig::load(&args.allocator_config)?;

    let services = if args.postgres {
        let store = PgStore::connect_from_env()
            .await
            .context("connect to Postgres")?;
        store.migrate().await.context("run migrations")?;
        build_services(
            engine_config,
            strategy_doc,
            allocator_config,
            Arc::new(store) as Arc<dyn Store>,
            Arc::new(NoopPublisher),
        )
        .await?
    } else {
        build_paper_services(engine_config, strategy_doc, allocator_config).await?
    };

    info!(
        venues = services.venues.names().len(),
        strategies = services.strategies.all().len(),
        "live_supervisor_starting"
    );

    let mut supervisor = Supervisor::new(services, SupervisorConfig::default());
    supervisor.run_until_signal().await?;
    println!("stopped=true");
    Ok(())
}
