//! Backend Registry
//!
//! Process-wide table of registered backends, built once at startup. All
//! mutable backend and pool state sits behind one mutex so that a scheduling
//! call never observes a half-applied refresh.

use super::backend::{Backend, BackendId, FleetState, Pool};
use super::events::RegistryEvent;
use super::pairing::{pair_backends, Relation};
use crate::adapters::AdapterFactory;
use crate::config::{validate_backend_name, BackendConfig};
use crate::domain::ports::StorageAdapterRef;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use futures::future::try_join_all;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Registry Statistics
// =============================================================================

/// Snapshot of registry-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub backends: usize,
    pub available_backends: usize,
    pub pools: usize,
    pub total_bytes: i64,
    pub free_bytes: i64,
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of every backend and its pools
pub struct Registry {
    backends: Vec<Backend>,
    by_name: HashMap<String, BackendId>,
    state: Mutex<FleetState>,
    events: broadcast::Sender<RegistryEvent>,
    metrics: Metrics,
}

impl Registry {
    /// Register every configured backend.
    ///
    /// Names are validated and must be unique, every adapter is initialized
    /// (any failure aborts the whole registration), and mirror then replica
    /// partners are linked once all backends exist.
    pub async fn register(configs: &[BackendConfig], factory: &AdapterFactory) -> Result<Arc<Self>> {
        let mut backends = Vec::with_capacity(configs.len());
        let mut by_name = HashMap::with_capacity(configs.len());

        for config in configs {
            validate_backend_name(&config.name)?;
            if by_name.contains_key(&config.name) {
                return Err(Error::DuplicateBackend {
                    name: config.name.clone(),
                });
            }
            config.validate()?;

            let id = BackendId(backends.len());
            let adapter = factory.create(config)?;
            by_name.insert(config.name.clone(), id);
            backends.push(Backend::new(id, config.clone(), adapter));
            info!(
                "Registered backend {} ({}, {} pools)",
                config.name,
                config.product,
                config.pool_names().len()
            );
        }

        try_join_all(backends.iter().map(|backend| async move {
            backend
                .adapter
                .init(&backend.config)
                .await
                .map_err(|e| match e {
                    Error::AdapterInit { .. } => e,
                    other => Error::AdapterInit {
                        backend: backend.name.clone(),
                        reason: other.to_string(),
                    },
                })
        }))
        .await?;

        let mirrors = pair_backends(&mut backends, Relation::Mirror);
        let replicas = pair_backends(&mut backends, Relation::Replica);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Mutex::new(FleetState::new(&backends));
        let registry = Arc::new(Self {
            backends,
            by_name,
            state,
            events,
            metrics: Metrics::new()?,
        });

        for (relation, pairs) in [(Relation::Mirror, mirrors), (Relation::Replica, replicas)] {
            for (a, b) in pairs {
                registry.notify_partners(relation, a, b);
            }
        }

        info!("Backend registry built with {} backends", registry.backends.len());
        Ok(registry)
    }

    fn notify_partners(&self, relation: Relation, a: BackendId, b: BackendId) {
        let (first, second) = (self.backend_by_id(a), self.backend_by_id(b));
        match relation {
            Relation::Mirror => {
                first.adapter.notify_mirror_partner(second.adapter());
                second.adapter.notify_mirror_partner(first.adapter());
            }
            Relation::Replica => {
                first.adapter.notify_replica_partner(second.adapter());
                second.adapter.notify_replica_partner(first.adapter());
            }
        }
        self.emit(RegistryEvent::BackendsPaired {
            relation: relation.to_string(),
            first: first.name.clone(),
            second: second.name.clone(),
        });
    }

    /// Look up a backend by name
    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.by_name.get(name).map(|id| &self.backends[id.0])
    }

    pub fn backend_by_id(&self, id: BackendId) -> &Backend {
        &self.backends[id.0]
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn adapter(&self, name: &str) -> Option<StorageAdapterRef> {
        self.backend(name).map(Backend::adapter)
    }

    /// Mirror partner of the named backend
    pub fn mirror_partner(&self, name: &str) -> Option<&Backend> {
        self.backend(name)
            .and_then(|b| b.mirror_partner)
            .map(|id| self.backend_by_id(id))
    }

    /// Replication partner of the named backend
    pub fn replica_partner(&self, name: &str) -> Option<&Backend> {
        self.backend(name)
            .and_then(|b| b.replica_partner)
            .map(|id| self.backend_by_id(id))
    }

    /// Whether the named backend's last refresh succeeded
    pub fn is_available(&self, name: &str) -> bool {
        self.by_name
            .get(name)
            .map_or(false, |id| self.state.lock().is_available(*id))
    }

    /// Consistent copy of every pool, in registration order
    pub fn pools_snapshot(&self) -> Vec<Pool> {
        let state = self.state.lock();
        state
            .backends
            .iter()
            .flat_map(|b| b.pools.iter().cloned())
            .collect()
    }

    /// Copy of one pool
    pub fn pool(&self, backend: &str, pool: &str) -> Option<Pool> {
        let id = *self.by_name.get(backend)?;
        let state = self.state.lock();
        state
            .backend(id)
            .pools
            .iter()
            .find(|p| p.name == pool)
            .cloned()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        let mut stats = RegistryStats {
            backends: self.backends.len(),
            ..Default::default()
        };
        for backend in &state.backends {
            if backend.available {
                stats.available_backends += 1;
            }
            for pool in &backend.pools {
                stats.pools += 1;
                stats.total_bytes += pool.capacity.total;
                stats.free_bytes += pool.capacity.free;
            }
        }
        stats
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Acquire the registry lock
    pub(crate) fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock()
    }

    pub(crate) fn emit(&self, event: RegistryEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Report a pool whose capacity breaks `0 <= free <= total`
    pub(crate) fn report_inconsistent(&self, pool: &Pool) {
        error!(
            "Pool {} has inconsistent capacity (free={}, total={}); excluded until next refresh",
            pool.qualified_name(),
            pool.capacity.free,
            pool.capacity.total
        );
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}
