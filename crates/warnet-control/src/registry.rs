//! Deployed networks by name.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use warnet_core::TankSelector;
use warnet_orchestrator::OrchestratorContext;
use warnet_rpc::RpcTarget;
use warnet_scenario::TargetSource;

/// Shared map of network name to its context. Reads clone the context out,
/// so no lock is held while a command runs.
#[derive(Clone, Default)]
pub struct NetworkRegistry {
    inner: Arc<RwLock<BTreeMap<String, OrchestratorContext>>>,
}

impl NetworkRegistry {
    /// Context of `network`.
    pub fn get(&self, network: &str) -> Option<OrchestratorContext> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .cloned()
    }

    /// Whether `network` is deployed.
    pub fn contains(&self, network: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(network)
    }

    /// Adds a context under its network name. Returns false if the name is taken.
    pub fn insert(&self, context: OrchestratorContext) -> bool {
        let mut networks = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if networks.contains_key(context.network()) {
            return false;
        }
        networks.insert(context.network().to_string(), context);
        true
    }

    /// Removes and returns the context of `network`.
    pub fn remove(&self, network: &str) -> Option<OrchestratorContext> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(network)
    }

    /// Deployed network names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl TargetSource for NetworkRegistry {
    fn targets(&self, network: &str) -> Option<Vec<RpcTarget>> {
        let context = self.get(network)?;
        context
            .resolve_targets(&TankSelector::All)
            .ok()
            .map(|(targets, _)| targets)
    }
}
