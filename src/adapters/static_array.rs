//! Static Array Adapter
//!
//! Serves capabilities and pool capacities declared in the backend's
//! configuration parameters instead of querying a live array. Used in
//! standalone mode and for scheduling dry runs.
//!
//! Recognized parameters:
//!
//! ```text
//! capabilities: "thin,thick,qos"         # backend-wide capabilities
//! capacity.<pool>: "100Gi/200Gi"         # free/total for one pool
//! capabilities.<pool>: "thin"            # pool-specific capabilities
//! ```

use crate::config::{parse_capacity, BackendConfig};
use crate::domain::ports::{
    Capability, CapabilitySet, PoolCapacity, PoolReport, StorageAdapter, StorageAdapterRef,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Default)]
struct ArrayState {
    capabilities: CapabilitySet,
    pools: BTreeMap<String, PoolReport>,
    failure: Option<String>,
    mirror_partner: Option<String>,
    replica_partner: Option<String>,
}

// =============================================================================
// Static Array Adapter
// =============================================================================

/// Adapter reporting configured, in-memory array state
#[derive(Debug)]
pub struct StaticArrayAdapter {
    backend: String,
    state: RwLock<ArrayState>,
}

impl StaticArrayAdapter {
    /// Create an adapter with no capabilities and no pools
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            state: RwLock::new(ArrayState::default()),
        }
    }

    /// Create an adapter from a backend's configuration parameters
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let adapter = Self::new(config.name.clone());
        adapter.load_parameters(config)?;
        Ok(adapter)
    }

    fn load_parameters(&self, config: &BackendConfig) -> Result<()> {
        let mut state = self.state.write();

        if let Some(list) = config.parameters.get("capabilities") {
            state.capabilities = parse_capability_list(&config.name, list)?;
        }

        for pool in config.pool_names() {
            let mut report = PoolReport::default();
            if let Some(declared) = config.parameters.get(&format!("capacity.{}", pool)) {
                report.capacity = parse_free_total(&config.name, declared)?;
            }
            if let Some(list) = config.parameters.get(&format!("capabilities.{}", pool)) {
                report.capabilities = parse_capability_list(&config.name, list)?;
            }
            state.pools.insert(pool, report);
        }

        Ok(())
    }

    pub fn set_capabilities(&self, capabilities: CapabilitySet) {
        self.state.write().capabilities = capabilities;
    }

    pub fn set_pool(&self, pool: impl Into<String>, report: PoolReport) {
        self.state.write().pools.insert(pool.into(), report);
    }

    pub fn set_pool_capacity(&self, pool: &str, capacity: PoolCapacity) {
        self.state
            .write()
            .pools
            .entry(pool.to_string())
            .or_default()
            .capacity = capacity;
    }

    pub fn remove_pool(&self, pool: &str) {
        self.state.write().pools.remove(pool);
    }

    /// Make every subsequent refresh call fail with `reason` (or succeed again)
    pub fn set_failure(&self, reason: Option<String>) {
        self.state.write().failure = reason;
    }

    pub fn mirror_partner(&self) -> Option<String> {
        self.state.read().mirror_partner.clone()
    }

    pub fn replica_partner(&self) -> Option<String> {
        self.state.read().replica_partner.clone()
    }

    fn check_failure(&self, operation: &str) -> Result<()> {
        match &self.state.read().failure {
            Some(reason) => Err(Error::BackendOperationFailed {
                backend: self.backend.clone(),
                operation: operation.into(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageAdapter for StaticArrayAdapter {
    async fn init(&self, config: &BackendConfig) -> Result<()> {
        if config.name != self.backend {
            return Err(Error::AdapterInit {
                backend: config.name.clone(),
                reason: format!("adapter was built for backend {}", self.backend),
            });
        }
        info!(
            "Static adapter ready for backend {} ({} pools)",
            self.backend,
            self.state.read().pools.len()
        );
        Ok(())
    }

    async fn refresh_backend_capabilities(&self) -> Result<CapabilitySet> {
        self.check_failure("refresh_backend_capabilities")?;
        Ok(self.state.read().capabilities.clone())
    }

    async fn refresh_pool_capacities(
        &self,
        pool_names: &[String],
    ) -> Result<BTreeMap<String, PoolReport>> {
        self.check_failure("refresh_pool_capacities")?;
        let state = self.state.read();
        let reports: BTreeMap<String, PoolReport> = pool_names
            .iter()
            .filter_map(|name| state.pools.get(name).map(|r| (name.clone(), r.clone())))
            .collect();
        debug!(
            "Backend {} reported {} of {} requested pools",
            self.backend,
            reports.len(),
            pool_names.len()
        );
        Ok(reports)
    }

    fn notify_mirror_partner(&self, partner: StorageAdapterRef) {
        self.state.write().mirror_partner = Some(partner.backend_name().to_string());
    }

    fn notify_replica_partner(&self, partner: StorageAdapterRef) {
        self.state.write().replica_partner = Some(partner.backend_name().to_string());
    }

    fn backend_name(&self) -> &str {
        &self.backend
    }
}

// =============================================================================
// Parameter Parsing
// =============================================================================

fn parse_capability_list(backend: &str, list: &str) -> Result<CapabilitySet> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            serde_json::from_value::<Capability>(serde_json::Value::String(name.to_string()))
                .map(|cap| (cap, true))
                .map_err(|_| Error::AdapterInit {
                    backend: backend.to_string(),
                    reason: format!("unknown capability {:?}", name),
                })
        })
        .collect()
}

fn parse_free_total(backend: &str, declared: &str) -> Result<PoolCapacity> {
    let (free, total) = declared.split_once('/').ok_or_else(|| Error::AdapterInit {
        backend: backend.to_string(),
        reason: format!("capacity {:?} is not in free/total form", declared),
    })?;
    Ok(PoolCapacity::new(
        bytes(backend, declared, free)?,
        bytes(backend, declared, total)?,
    ))
}

fn bytes(backend: &str, declared: &str, quantity: &str) -> Result<i64> {
    i64::try_from(parse_capacity(quantity)?).map_err(|_| Error::AdapterInit {
        backend: backend.to_string(),
        reason: format!("capacity {:?} is out of range", declared),
    })
}
