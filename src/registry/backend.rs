//! Backends and Pools
//!
//! A [`Backend`] is the immutable description of one registered array. Its
//! mutable half (availability, capabilities, pools) lives in [`FleetState`],
//! which the registry keeps behind its single lock.

use crate::config::BackendConfig;
use crate::domain::ports::{
    CapabilitySet, PoolCapacity, StorageAdapterRef, StorageKind, StorageProduct, Topology,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Identifiers
// =============================================================================

/// Index of a backend in its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BackendId(pub usize);

/// Address of one pool: owning backend plus position in its pool list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PoolRef {
    pub backend: BackendId,
    pub index: usize,
}

// =============================================================================
// Backend
// =============================================================================

/// A registered backend. Never mutated once the registry is built.
pub struct Backend {
    pub id: BackendId,
    pub name: String,
    pub product: StorageProduct,
    pub supported_topologies: Vec<Topology>,
    pub mirror_partner: Option<BackendId>,
    pub replica_partner: Option<BackendId>,
    pub(crate) config: BackendConfig,
    pub(crate) adapter: StorageAdapterRef,
}

impl Backend {
    pub(crate) fn new(id: BackendId, config: BackendConfig, adapter: StorageAdapterRef) -> Self {
        Self {
            id,
            name: config.name.clone(),
            product: config.product,
            supported_topologies: config.supported_topologies.clone(),
            mirror_partner: None,
            replica_partner: None,
            config,
            adapter,
        }
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.product.storage_kind()
    }

    /// Configured pool names (or the synthetic pool)
    pub fn pool_names(&self) -> Vec<String> {
        self.config.pool_names()
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn adapter(&self) -> StorageAdapterRef {
        self.adapter.clone()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("product", &self.product)
            .field("mirror_partner", &self.mirror_partner)
            .field("replica_partner", &self.replica_partner)
            .finish()
    }
}

// =============================================================================
// Pool
// =============================================================================

/// A capacity unit inside one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pool {
    pub name: String,
    pub kind: StorageKind,
    /// Owning backend (lookup only)
    pub backend_id: BackendId,
    pub backend: String,
    pub capabilities: CapabilitySet,
    pub capacity: PoolCapacity,
}

impl Pool {
    pub(crate) fn new(backend: &Backend, name: String) -> Self {
        Self {
            name,
            kind: backend.storage_kind(),
            backend_id: backend.id,
            backend: backend.name.clone(),
            capabilities: CapabilitySet::new(),
            capacity: PoolCapacity::default(),
        }
    }

    /// `backend/pool`, used in diagnostics
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.backend, self.name)
    }
}

// =============================================================================
// Fleet State
// =============================================================================

/// Mutable state of one backend
#[derive(Debug, Clone)]
pub struct BackendState {
    /// True only while the most recent refresh succeeded
    pub available: bool,
    pub capabilities: CapabilitySet,
    pub pools: Vec<Pool>,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Mutable state of every backend, indexed by [`BackendId`]
#[derive(Debug, Clone, Default)]
pub struct FleetState {
    pub(crate) backends: Vec<BackendState>,
}

impl FleetState {
    pub(crate) fn new(backends: &[Backend]) -> Self {
        let backends = backends
            .iter()
            .map(|backend| BackendState {
                available: false,
                capabilities: CapabilitySet::new(),
                pools: backend
                    .pool_names()
                    .into_iter()
                    .map(|name| Pool::new(backend, name))
                    .collect(),
                last_refresh: None,
            })
            .collect();
        Self { backends }
    }

    pub fn backend(&self, id: BackendId) -> &BackendState {
        &self.backends[id.0]
    }

    pub(crate) fn backend_mut(&mut self, id: BackendId) -> &mut BackendState {
        &mut self.backends[id.0]
    }

    pub fn pool(&self, pool: PoolRef) -> &Pool {
        &self.backends[pool.backend.0].pools[pool.index]
    }

    pub(crate) fn pool_mut(&mut self, pool: PoolRef) -> &mut Pool {
        &mut self.backends[pool.backend.0].pools[pool.index]
    }

    pub fn is_available(&self, id: BackendId) -> bool {
        self.backends[id.0].available
    }

    /// Every pool of one backend
    pub fn pools_of(&self, id: BackendId) -> Vec<PoolRef> {
        (0..self.backends[id.0].pools.len())
            .map(|index| PoolRef { backend: id, index })
            .collect()
    }

    /// Every pool of every available backend
    pub fn available_pools(&self) -> Vec<PoolRef> {
        self.backends
            .iter()
            .enumerate()
            .filter(|(_, state)| state.available)
            .flat_map(|(i, _)| self.pools_of(BackendId(i)))
            .collect()
    }

    pub fn qualified_names(&self, pools: &[PoolRef]) -> Vec<String> {
        pools.iter().map(|p| self.pool(*p).qualified_name()).collect()
    }
}
