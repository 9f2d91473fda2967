//! Strategy registry: config-loaded definitions plus runtime registrations.
//!
//! Lookup is runtime-first, so an operator-registered definition shadows a
//! config entry of the same name. Config entries are read-only after load;
//! the runtime side is mutable. Persistence of runtime registrations is
//! best-effort and handled by the supervisor (the registry itself has no
//! store handle).

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::info;

use cxd_config::{ScannerConfig, StrategyConfigDoc, StrategyDefinition};

pub struct StrategyRegistry {
    config: BTreeMap<String, StrategyDefinition>,
    runtime: RwLock<BTreeMap<String, StrategyDefinition>>,
    scanner: ScannerConfig,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            config: BTreeMap::new(),
            runtime: RwLock::new(BTreeMap::new()),
            scanner: ScannerConfig::default(),
        }
    }

    /// Build the registry from a loaded config document.
    pub fn from_doc(doc: StrategyConfigDoc) -> Self {
        let mut config = BTreeMap::new();
        for mut def in doc.strategies {
            // Materialise derived ids so every consumer sees the same value.
            def.id = Some(def.effective_id());
            config.insert(def.name.clone(), def);
        }
        info!(count = config.len(), "strategy_registry_loaded");
        Self {
            config,
            runtime: RwLock::new(BTreeMap::new()),
            scanner: doc.scanner,
        }
    }

    pub fn scanner_config(&self) -> &ScannerConfig {
        &self.scanner
    }

    /// Register or replace a runtime definition.
    pub fn register_runtime(&self, mut def: StrategyDefinition) {
        def.id = Some(def.effective_id());
        let mut g = self.runtime.write().unwrap();
        info!(name = %def.name, "strategy_registered_runtime");
        g.insert(def.name.clone(), def);
    }

    /// Runtime-first lookup by name.
    pub fn get(&self, name: &str) -> Option<StrategyDefinition> {
        {
            let g = self.runtime.read().unwrap();
            if let Some(def) = g.get(name) {
                return Some(def.clone());
            }
        }
        self.config.get(name).cloned()
    }

    /// All enabled definitions, runtime entries shadowing config entries of
    /// the same name. Deterministic name order.
    pub fn enabled(&self) -> Vec<StrategyDefinition> {
        let runtime = self.runtime.read().unwrap();
        let mut merged: BTreeMap<String, StrategyDefinition> = self.config.clone();
        for (name, def) in runtime.iter() {
            merged.insert(name.clone(), def.clone());
        }
        merged.into_values().filter(|d| d.enabled).collect()
    }

    /// All definitions regardless of the enabled flag.
    pub fn all(&self) -> Vec<StrategyDefinition> {
        let runtime = self.runtime.read().unwrap();
        let mut merged: BTreeMap<String, StrategyDefinition> = self.config.clone();
        for (name, def) in runtime.iter() {
            merged.insert(name.clone(), def.clone());
        }
        merged.into_values().collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
