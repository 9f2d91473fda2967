//! Supervisor: constructs and owns the [`Services`] handle and drives the
//! long-running loops.
//!
//! The services handle replaces the module-level singletons of the original
//! design: every scanner, planner and loop receives its dependencies
//! explicitly. The only process-wide mutable state is the circuit-breaker
//! set, and that is an explicit shared object inside the risk engine.
//!
//! Loops:
//! - per-venue market-data pump (adapter tickers → market-data service)
//! - scanner/allocator tick (opportunities → allocations → OMS)
//! - reconciliation tick (per venue, serialised inside the service)
//! - health tick (adapter health → store)
//!
//! A crashing dependency degrades its own loop only: every tick catches and
//! logs, and missing data downstream rejects rather than guesses.

pub mod candles;
pub mod services;

pub use candles::CandleBuffer;
pub use services::{build_paper_services, Services};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cxd_venues::VenueAdapter;

/// Loop cadences.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub market_data_poll: Duration,
    pub scan_interval: Duration,
    pub recon_interval: Duration,
    pub health_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            market_data_poll: Duration::from_secs(2),
            scan_interval: Duration::from_secs(15),
            recon_interval: Duration::from_secs(60),
            health_interval: Duration::from_secs(10),
        }
    }
}

/// Owns the running loops; dropping the supervisor (or calling
/// [`Supervisor::shutdown`]) stops them.
pub struct Supervisor {
    services: Arc<Services>,
    config: SupervisorConfig,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(services: Arc<Services>, config: SupervisorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            services,
            config,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawn every loop. Idempotent start is not supported; call once.
    pub fn start(&mut self) {
        info!("supervisor_starting");
        self.spawn_market_data_pumps();
        self.spawn_scan_loop();
        self.spawn_recon_loop();
        self.spawn_health_loop();
    }

    /// Signal all loops to stop and wait for them.
    pub async fn shutdown(&mut self) {
        info!("supervisor_stopping");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Run until ctrl-c, then shut down.
    pub async fn run_until_signal(&mut self) -> anyhow::Result<()> {
        self.start();
        tokio::signal::ctrl_c().await?;
        self.shutdown().await;
        Ok(())
    }

    fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn spawn_market_data_pumps(&mut self) {
        let adapters: Vec<(String, Arc<dyn VenueAdapter>)> = self
            .services
            .venues
            .iter()
            .map(|(name, adapter)| (name.clone(), Arc::clone(adapter)))
            .collect();

        for (name, adapter) in adapters {
            let services = Arc::clone(&self.services);
            let poll = self.config.market_data_poll;
            let mut shutdown = self.subscribe_shutdown();

            self.handles.push(tokio::spawn(async move {
                let instruments = services
                    .engine_config
                    .venue(&name)
                    .map(|v| v.supported_instruments.clone())
                    .unwrap_or_default();
                let mut ticker = tokio::time::interval(poll);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                    for instrument in &instruments {
                        match adapter.get_ticker(instrument).await {
                            Ok(Some(snapshot)) => {
                                services
                                    .marketdata
                                    .update_quote(cxd_marketdata::QuoteUpdate {
                                        venue: snapshot.venue.clone(),
                                        instrument: snapshot.instrument.clone(),
                                        bid: snapshot.bid,
                                        ask: snapshot.ask,
                                        last: snapshot.last,
                                        volume_24h: snapshot.volume_24h,
                                        bid_size: snapshot.bid_size,
                                        ask_size: snapshot.ask_size,
                                        volatility_bps: snapshot.volatility_bps,
                                        event_time: Some(snapshot.event_time),
                                        data_quality: snapshot.data_quality,
                                    })
                                    .await;
                                services.candles.observe(instrument, snapshot.mid).await;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                // A dead adapter must not take the pump down:
                                // the snapshot simply goes stale and gates
                                // reject downstream.
                                warn!(venue = %name, error = %e, "ticker_poll_failed");
                            }
                        }
                    }
                }
                info!(venue = %name, "market_data_pump_stopped");
            }));
        }
    }

    fn spawn_scan_loop(&mut self) {
        let services = Arc::clone(&self.services);
        let interval = self.config.scan_interval;
        let mut shutdown = self.subscribe_shutdown();

        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(e) = scan_cycle(&services).await {
                    error!(error = %e, "scan_cycle_failed");
                }
            }
            info!("scan_loop_stopped");
        }));
    }

    fn spawn_recon_loop(&mut self) {
        let services = Arc::clone(&self.services);
        let interval = self.config.recon_interval;
        let mut shutdown = self.subscribe_shutdown();

        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let reports = services.recon.run_all().await;
                for (venue, report) in reports {
                    if report.status != "ok" {
                        warn!(venue = %venue, status = %report.status, "recon_report");
                    }
                }
            }
            info!("recon_loop_stopped");
        }));
    }

    fn spawn_health_loop(&mut self) {
        let services = Arc::clone(&self.services);
        let interval = self.config.health_interval;
        let mut shutdown = self.subscribe_shutdown();

        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                for (name, adapter) in services.venues.iter() {
                    let health = adapter.health_check().await;
                    if let Err(e) = services.store.record_venue_health(&health).await {
                        warn!(venue = %name, error = %e, "venue_health_persist_failed");
                    }
                }
            }
            info!("health_loop_stopped");
        }));
    }
}

/// One scanner/allocator cycle: regime → allocation → intents → OMS.
pub async fn scan_cycle(services: &Services) -> anyhow::Result<()> {
    let regime = services.regime.detect(&services.primary_venue).await?;
    let allocations = services
        .allocator
        .run_allocation(&regime, services.engine_config.total_capital_usd)
        .await?;
    if allocations.is_empty() {
        // Degraded data or nothing registered; previous decision stands.
        info!("allocation_skipped");
    }

    let books = services.store.list_books().await?;
    let intents = services.scanner.generate_intents(&books).await;
    if intents.is_empty() {
        return Ok(());
    }
    let intents = services.allocator.apply_allocations(intents).await?;

    for intent in intents {
        let venue = services
            .strategies
            .enabled()
            .into_iter()
            .find(|s| s.effective_id() == intent.strategy_id)
            .and_then(|s| s.venue_routing.first().cloned())
            .unwrap_or_else(|| services.primary_venue.clone());

        match services.oms.execute_intent(&intent, &venue).await {
            Ok(Some(order)) => {
                info!(order_id = %order.id, status = %order.status, "intent_executed");
            }
            Ok(None) => {}
            Err(e) => error!(intent_id = %intent.id, error = %e, "intent_execution_failed"),
        }
    }
    Ok(())
}
