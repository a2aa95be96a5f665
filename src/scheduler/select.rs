//! Pool Selection
//!
//! Runs the filter chain, the topology stage and the capacity stage over a
//! candidate set and picks the pool with the most free capacity. Thick
//! allocations reserve their size on the chosen pool before the registry
//! lock is released.

use super::constraints::{AllocType, TopologyRequirement, VolumeConstraints};
use super::filters::{FilterChain, FleetView};
use super::topology::{filter_by_requisite, order_by_preference};
use crate::domain::ports::{Capability, CapabilitySet, PoolCapacity, StorageKind};
use crate::error::{Error, ErrorClass, Result};
use crate::metrics::outcome;
use crate::registry::{BackendId, FleetState, Pool, PoolRef, Registry, RegistryEvent, Relation};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NO_TOPOLOGY: TopologyRequirement = TopologyRequirement {
    requisite: Vec::new(),
    preferred: Vec::new(),
};

// =============================================================================
// Selection Results
// =============================================================================

/// A pool chosen for one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPool {
    pub backend: String,
    pub pool: String,
    pub kind: StorageKind,
    pub capabilities: CapabilitySet,
    /// Capacity after any reservation made by this selection
    pub capacity: PoolCapacity,
    /// Bytes debited from free capacity (zero for thin allocations)
    pub reserved_bytes: i64,
}

impl SelectedPool {
    fn new(pool: &Pool, reserved_bytes: i64) -> Self {
        Self {
            backend: pool.backend.clone(),
            pool: pool.name.clone(),
            kind: pool.kind,
            capabilities: pool.capabilities.clone(),
            capacity: pool.capacity,
            reserved_bytes,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.backend, self.pool)
    }
}

/// Local pool plus, for mirrored or replicated volumes, the partner's pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSelection {
    pub local: SelectedPool,
    pub remote: Option<SelectedPool>,
}

/// A chosen but not yet committed pool
#[derive(Debug, Clone, Copy)]
struct Pick {
    pool: PoolRef,
    thick: bool,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Selects pools for volume requests against a shared registry
pub struct Scheduler {
    registry: Arc<Registry>,
    /// Tie-break shuffle source; always locked after the registry lock
    rng: Mutex<StdRng>,
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Scheduler with a deterministic shuffle
    pub fn with_seed(registry: Arc<Registry>, seed: u64) -> Self {
        Self {
            registry,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Select the local pool and, when mirroring or replication is
    /// requested, a pool on the partner backend.
    ///
    /// Both sides are chosen under one registry lock and capacity is only
    /// reserved once both succeeded.
    pub fn select_storage_pool(
        &self,
        size: i64,
        constraints: &VolumeConstraints,
    ) -> Result<PoolSelection> {
        let result = self.try_select_storage_pool(size, constraints);
        let success = match &result {
            Ok(selection) if selection.remote.is_some() => outcome::PAIRED,
            _ => outcome::SELECTED,
        };
        self.observe(result, success)
    }

    fn try_select_storage_pool(
        &self,
        size: i64,
        constraints: &VolumeConstraints,
    ) -> Result<PoolSelection> {
        constraints.check_exclusive()?;
        check_size(size)?;

        let (selection, events) = {
            let mut state = self.registry.lock();
            let view = self.view(&state);

            let local = self.choose(
                &view,
                size,
                constraints,
                state.available_pools(),
                &FilterChain::primary(),
                &constraints.topology,
            )?;
            let remote = match paired_relation(constraints) {
                Some(relation) => {
                    let candidates = partner_pools(&view, local.pool.backend, relation)?;
                    Some(self.choose(
                        &view,
                        size,
                        constraints,
                        candidates,
                        &FilterChain::secondary(),
                        &NO_TOPOLOGY,
                    )?)
                }
                None => None,
            };

            let mut events = Vec::new();
            let local = commit(&mut state, local, size, &mut events);
            let remote = remote.map(|pick| commit(&mut state, pick, size, &mut events));
            (PoolSelection { local, remote }, events)
        };

        self.publish(events);
        match &selection.remote {
            Some(remote) => info!(
                "Selected pool {} with partner pool {} for {} bytes",
                selection.local.qualified_name(),
                remote.qualified_name(),
                size
            ),
            None => info!(
                "Selected pool {} for {} bytes",
                selection.local.qualified_name(),
                size
            ),
        }
        Ok(selection)
    }

    /// Select one pool from `candidates` with an explicit filter chain.
    ///
    /// An empty candidate set means every pool of every available backend.
    pub fn select_pool(
        &self,
        size: i64,
        constraints: &VolumeConstraints,
        candidates: Vec<PoolRef>,
        chain: &FilterChain,
    ) -> Result<SelectedPool> {
        let result = self.try_select_pool(size, constraints, candidates, chain);
        self.observe(result, outcome::SELECTED)
    }

    fn try_select_pool(
        &self,
        size: i64,
        constraints: &VolumeConstraints,
        candidates: Vec<PoolRef>,
        chain: &FilterChain,
    ) -> Result<SelectedPool> {
        check_size(size)?;

        let (selected, events) = {
            let mut state = self.registry.lock();
            let candidates = if candidates.is_empty() {
                state.available_pools()
            } else {
                candidates
            };
            let view = self.view(&state);
            let pick = self.choose(&view, size, constraints, candidates, chain, &constraints.topology)?;
            let mut events = Vec::new();
            let selected = commit(&mut state, pick, size, &mut events);
            (selected, events)
        };

        self.publish(events);
        Ok(selected)
    }

    /// Select a pool on the mirror or replication partner of `local_backend`
    pub fn select_paired_pool(
        &self,
        size: i64,
        constraints: &VolumeConstraints,
        local_backend: &str,
    ) -> Result<SelectedPool> {
        let result = self.try_select_paired_pool(size, constraints, local_backend);
        self.observe(result, outcome::PAIRED)
    }

    fn try_select_paired_pool(
        &self,
        size: i64,
        constraints: &VolumeConstraints,
        local_backend: &str,
    ) -> Result<SelectedPool> {
        constraints.check_exclusive()?;
        check_size(size)?;
        let relation = paired_relation(constraints).ok_or_else(|| {
            Error::Configuration("paired selection requires hyperMetro or replication".to_string())
        })?;
        let local = self
            .registry
            .backend(local_backend)
            .ok_or_else(|| Error::BackendNotFound {
                backend: local_backend.to_string(),
            })?
            .id;

        let (selected, events) = {
            let mut state = self.registry.lock();
            let view = self.view(&state);
            let candidates = partner_pools(&view, local, relation)?;
            let pick = self.choose(
                &view,
                size,
                constraints,
                candidates,
                &FilterChain::secondary(),
                &NO_TOPOLOGY,
            )?;
            let mut events = Vec::new();
            let selected = commit(&mut state, pick, size, &mut events);
            (selected, events)
        };

        self.publish(events);
        Ok(selected)
    }

    fn view<'a>(&'a self, state: &'a FleetState) -> FleetView<'a> {
        FleetView {
            backends: self.registry.backends(),
            state,
        }
    }

    /// Run every stage over `candidates` and pick the pool with the most
    /// free capacity. Ties go to the earliest pool in preference order.
    fn choose(
        &self,
        view: &FleetView<'_>,
        size: i64,
        constraints: &VolumeConstraints,
        mut candidates: Vec<PoolRef>,
        chain: &FilterChain,
        topology: &TopologyRequirement,
    ) -> Result<Pick> {
        candidates.retain(|p| {
            let pool = view.pool(*p);
            if pool.capacity.is_consistent() {
                true
            } else {
                self.registry.report_inconsistent(pool);
                false
            }
        });
        if candidates.is_empty() {
            return Err(Error::NoAvailablePool);
        }

        let candidates = chain.run(constraints, view, candidates)?;
        let candidates = filter_by_requisite(topology, view, candidates)?;
        let ordered = order_by_preference(topology, view, candidates, &mut *self.rng.lock());

        let mut best: Option<Pick> = None;
        let mut best_free = i64::MIN;
        for p in &ordered {
            let pool = view.pool(*p);
            let thick = is_thick(constraints, pool);
            if thick && pool.capacity.free < size {
                debug!(
                    "Pool {} has {} free bytes, {} requested",
                    pool.qualified_name(),
                    pool.capacity.free,
                    size
                );
                continue;
            }
            if pool.capacity.free > best_free {
                best_free = pool.capacity.free;
                best = Some(Pick { pool: *p, thick });
            }
        }

        best.ok_or_else(|| Error::InsufficientCapacity {
            size,
            rejected: view.names(&ordered),
        })
    }

    fn publish(&self, events: Vec<RegistryEvent>) {
        for event in events {
            if let RegistryEvent::CapacityReserved {
                backend,
                pool,
                remaining,
                ..
            } = &event
            {
                self.registry
                    .metrics()
                    .set_pool_free(backend, pool, *remaining);
            }
            self.registry.emit(event);
        }
    }

    fn observe<T>(&self, result: Result<T>, success: &str) -> Result<T> {
        let metrics = self.registry.metrics();
        match &result {
            Ok(_) => metrics.record_selection(success),
            Err(e) if e.class() == ErrorClass::Exhausted => {
                warn!("Pool selection exhausted: {}", e);
                metrics.record_selection(outcome::EXHAUSTED);
            }
            Err(e) => {
                warn!("Pool selection rejected: {}", e);
                metrics.record_selection(outcome::REJECTED);
            }
        }
        result
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_size(size: i64) -> Result<()> {
    if size < 0 {
        return Err(Error::Configuration(format!(
            "Requested size must not be negative: {}",
            size
        )));
    }
    Ok(())
}

/// Relation a request needs a partner pool for
fn paired_relation(constraints: &VolumeConstraints) -> Option<Relation> {
    if constraints.hyper_metro {
        Some(Relation::Mirror)
    } else if constraints.replication {
        Some(Relation::Replica)
    } else {
        None
    }
}

/// Every pool of `local`'s partner, which must be available
fn partner_pools(
    view: &FleetView<'_>,
    local: BackendId,
    relation: Relation,
) -> Result<Vec<PoolRef>> {
    let backend = &view.backends[local.0];
    let partner = match relation {
        Relation::Mirror => backend.mirror_partner,
        Relation::Replica => backend.replica_partner,
    }
    .ok_or_else(|| Error::NoPairedBackend {
        relation: relation.to_string(),
        backend: backend.name.clone(),
    })?;

    if !view.state.is_available(partner) {
        return Err(Error::BackendUnavailable {
            backend: view.backends[partner.0].name.clone(),
        });
    }
    Ok(view.state.pools_of(partner))
}

/// Whether a request reserves capacity on `pool`.
///
/// Without an explicit allocation type, pools that cannot thin-provision
/// allocate thick.
fn is_thick(constraints: &VolumeConstraints, pool: &Pool) -> bool {
    match constraints.alloc_type {
        Some(AllocType::Thick) => true,
        Some(AllocType::Thin) => false,
        None => !pool.capabilities.supports(Capability::Thin),
    }
}

/// Reserve thick capacity on the picked pool and snapshot it
fn commit(
    state: &mut FleetState,
    pick: Pick,
    size: i64,
    events: &mut Vec<RegistryEvent>,
) -> SelectedPool {
    let pool = state.pool_mut(pick.pool);
    if !pick.thick {
        return SelectedPool::new(pool, 0);
    }

    pool.capacity.free -= size;
    pool.capacity.used += size;
    events.push(RegistryEvent::CapacityReserved {
        backend: pool.backend.clone(),
        pool: pool.name.clone(),
        bytes: size,
        remaining: pool.capacity.free,
    });
    SelectedPool::new(pool, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterFactory, StaticArrayAdapter};
    use crate::config::{BackendConfig, PairingConfig};
    use crate::domain::ports::{PoolReport, StorageProduct};
    use crate::refresh::{RefreshEngine, RefreshMode};
    use assert_matches::assert_matches;

    const GIB: i64 = 1 << 30;

    fn caps(list: &[Capability]) -> CapabilitySet {
        list.iter().map(|c| (*c, true)).collect()
    }

    fn array(name: &str, pool: &str, free: i64, capabilities: &[Capability]) -> (BackendConfig, Arc<StaticArrayAdapter>) {
        let adapter = Arc::new(StaticArrayAdapter::new(name));
        adapter.set_capabilities(caps(capabilities));
        adapter.set_pool(
            pool,
            PoolReport {
                capabilities: CapabilitySet::new(),
                capacity: PoolCapacity::new(free, 200 * GIB),
            },
        );
        let config = BackendConfig::new(name, StorageProduct::BlockArray).with_pools([pool]);
        (config, adapter)
    }

    async fn scheduler(fleet: Vec<(BackendConfig, Arc<StaticArrayAdapter>)>) -> Scheduler {
        let factory = fleet.iter().fold(AdapterFactory::new(), |factory, (config, adapter)| {
            factory.with_instance(config.name.clone(), adapter.clone())
        });
        let configs: Vec<_> = fleet.into_iter().map(|(config, _)| config).collect();
        let registry = Registry::register(&configs, &factory).await.unwrap();
        RefreshEngine::new(registry.clone())
            .refresh_all(RefreshMode::Synchronous)
            .await
            .unwrap();
        Scheduler::with_seed(registry, 42)
    }

    /// array-a: p1, 100GiB free, thin+thick; array-b: p2, 50GiB free, thin only
    async fn two_arrays() -> Scheduler {
        scheduler(vec![
            array("array-a", "p1", 100 * GIB, &[Capability::Thin, Capability::Thick]),
            array("array-b", "p2", 50 * GIB, &[Capability::Thin]),
        ])
        .await
    }

    fn free(scheduler: &Scheduler, backend: &str, pool: &str) -> i64 {
        scheduler.registry().pool(backend, pool).unwrap().capacity.free
    }

    #[tokio::test]
    async fn test_thick_selection_reserves_capacity() {
        let scheduler = two_arrays().await;
        let mut events = scheduler.registry().subscribe();
        let thick = VolumeConstraints::new().with_alloc_type(AllocType::Thick);

        let selection = scheduler.select_storage_pool(80 * GIB, &thick).unwrap();

        assert_eq!(selection.local.qualified_name(), "array-a/p1");
        assert_eq!(selection.local.reserved_bytes, 80 * GIB);
        assert_eq!(selection.local.capacity.free, 20 * GIB);
        assert!(selection.remote.is_none());
        assert_eq!(free(&scheduler, "array-a", "p1"), 20 * GIB);
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::CapacityReserved {
                backend: "array-a".into(),
                pool: "p1".into(),
                bytes: 80 * GIB,
                remaining: 20 * GIB,
            }
        );
        assert_eq!(scheduler.registry().metrics().selections(outcome::SELECTED), 1);
    }

    #[tokio::test]
    async fn test_thin_selection_leaves_capacity() {
        let scheduler = two_arrays().await;
        let thin = VolumeConstraints::new().with_alloc_type(AllocType::Thin);

        for _ in 0..3 {
            let selection = scheduler.select_storage_pool(80 * GIB, &thin).unwrap();
            assert_eq!(selection.local.qualified_name(), "array-a/p1");
            assert_eq!(selection.local.reserved_bytes, 0);
        }
        assert_eq!(free(&scheduler, "array-a", "p1"), 100 * GIB);
        assert_eq!(free(&scheduler, "array-b", "p2"), 50 * GIB);
    }

    #[tokio::test]
    async fn test_capacity_exhaustion() {
        let scheduler = two_arrays().await;
        let thick = VolumeConstraints::new().with_alloc_type(AllocType::Thick);

        scheduler.select_storage_pool(80 * GIB, &thick).unwrap();
        assert_matches!(
            scheduler.select_storage_pool(80 * GIB, &thick),
            Err(Error::InsufficientCapacity { size, rejected })
                if size == 80 * GIB && rejected == vec!["array-a/p1".to_string()]
        );
        assert_eq!(free(&scheduler, "array-a", "p1"), 20 * GIB);
        assert_eq!(scheduler.registry().metrics().selections(outcome::EXHAUSTED), 1);
    }

    #[tokio::test]
    async fn test_concurrent_thick_allocations_never_overspend() {
        let scheduler = scheduler(vec![array("array-a", "p1", 100 * GIB, &[Capability::Thick])]).await;
        let thick = VolumeConstraints::new().with_alloc_type(AllocType::Thick);

        let successes: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| scheduler.select_storage_pool(10 * GIB, &thick)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|r| match r {
                    Ok(_) => true,
                    Err(e) => {
                        assert_matches!(e, Error::InsufficientCapacity { .. });
                        false
                    }
                })
                .count()
        });

        assert_eq!(successes, 10);
        assert_eq!(free(&scheduler, "array-a", "p1"), 0);
    }

    #[tokio::test]
    async fn test_default_alloc_type_follows_thin_support() {
        let scheduler = scheduler(vec![
            array("array-a", "p1", 100 * GIB, &[Capability::Thick]),
            array("array-b", "p2", 50 * GIB, &[Capability::Thin]),
        ])
        .await;

        // Thick-only p1 has too little room, thin p2 is not capacity-checked
        let selection = scheduler
            .select_storage_pool(150 * GIB, &VolumeConstraints::new())
            .unwrap();
        assert_eq!(selection.local.qualified_name(), "array-b/p2");
        assert_eq!(free(&scheduler, "array-b", "p2"), 50 * GIB);
    }

    #[tokio::test]
    async fn test_inconsistent_pool_excluded() {
        let (config, adapter) = array("array-a", "p1", 10 * GIB, &[Capability::Thin]);
        adapter.set_pool_capacity("p1", PoolCapacity::new(300 * GIB, 200 * GIB));
        let scheduler = scheduler(vec![
            (config, adapter),
            array("array-b", "p2", 50 * GIB, &[Capability::Thin]),
        ])
        .await;

        let selection = scheduler
            .select_storage_pool(GIB, &VolumeConstraints::new())
            .unwrap();
        assert_eq!(selection.local.qualified_name(), "array-b/p2");
    }

    #[tokio::test]
    async fn test_mirror_and_replication_are_exclusive() {
        let scheduler = two_arrays().await;
        let both = VolumeConstraints::new().with_hyper_metro().with_replication();

        assert_matches!(
            scheduler.select_storage_pool(GIB, &both),
            Err(Error::MutuallyExclusiveConstraints { .. })
        );
        assert_matches!(
            scheduler.select_paired_pool(GIB, &both, "array-a"),
            Err(Error::MutuallyExclusiveConstraints { .. })
        );
        assert_eq!(scheduler.registry().metrics().selections(outcome::REJECTED), 2);
    }

    fn mirrored(free_a: i64, free_b: i64) -> Vec<(BackendConfig, Arc<StaticArrayAdapter>)> {
        let metro = [Capability::Thick, Capability::HyperMetro];
        let (a, adapter_a) = array("array-a", "p1", free_a, &metro);
        let (b, adapter_b) = array("array-b", "p2", free_b, &metro);
        vec![
            (a.with_mirror(PairingConfig::partner("array-b")), adapter_a),
            (b.with_mirror(PairingConfig::partner("array-a")), adapter_b),
        ]
    }

    #[tokio::test]
    async fn test_mirrored_selection_reserves_both_sides() {
        let scheduler = scheduler(mirrored(100 * GIB, 60 * GIB)).await;
        let request = VolumeConstraints::new()
            .with_hyper_metro()
            .with_alloc_type(AllocType::Thick)
            .with_backend("array-a");

        let selection = scheduler.select_storage_pool(10 * GIB, &request).unwrap();

        assert_eq!(selection.local.qualified_name(), "array-a/p1");
        let remote = selection.remote.unwrap();
        assert_eq!(remote.qualified_name(), "array-b/p2");
        assert_eq!(free(&scheduler, "array-a", "p1"), 90 * GIB);
        assert_eq!(free(&scheduler, "array-b", "p2"), 50 * GIB);
        assert_eq!(scheduler.registry().metrics().selections(outcome::PAIRED), 1);
    }

    #[tokio::test]
    async fn test_failed_partner_side_reserves_nothing() {
        let scheduler = scheduler(mirrored(100 * GIB, 5 * GIB)).await;
        let request = VolumeConstraints::new()
            .with_hyper_metro()
            .with_alloc_type(AllocType::Thick)
            .with_backend("array-a");

        assert_matches!(
            scheduler.select_storage_pool(10 * GIB, &request),
            Err(Error::InsufficientCapacity { rejected, .. })
                if rejected == vec!["array-b/p2".to_string()]
        );
        assert_eq!(free(&scheduler, "array-a", "p1"), 100 * GIB);
        assert_eq!(free(&scheduler, "array-b", "p2"), 5 * GIB);
    }

    #[tokio::test]
    async fn test_no_paired_backend() {
        let scheduler = two_arrays().await;
        let request = VolumeConstraints::new().with_replication();

        assert_matches!(
            scheduler.select_paired_pool(GIB, &request, "array-a"),
            Err(Error::NoPairedBackend { relation, backend })
                if relation == "replication" && backend == "array-a"
        );
        assert_matches!(
            scheduler.select_paired_pool(GIB, &request, "array-z"),
            Err(Error::BackendNotFound { .. })
        );
        // Without a live partner the replication filter removes every pool
        assert_matches!(
            scheduler.select_storage_pool(GIB, &request),
            Err(Error::FilteredOut { key, .. }) if key == "replication"
        );
    }

    #[tokio::test]
    async fn test_replica_partner_selection() {
        let replicated = [Capability::Thin, Capability::Replication];
        let (a, adapter_a) = array("array-a", "p1", 100 * GIB, &replicated);
        let (b, adapter_b) = array("array-b", "p2", 60 * GIB, &replicated);
        let scheduler = scheduler(vec![
            (a.with_replica(PairingConfig::domain("dr")), adapter_a),
            (b.with_replica(PairingConfig::domain("dr")), adapter_b),
        ])
        .await;

        let selected = scheduler
            .select_paired_pool(GIB, &VolumeConstraints::new().with_replication(), "array-b")
            .unwrap();
        assert_eq!(selected.qualified_name(), "array-a/p1");
        assert_eq!(selected.reserved_bytes, 0);
    }

    #[tokio::test]
    async fn test_pinned_pool_with_explicit_chain() {
        let scheduler = two_arrays().await;
        let request = VolumeConstraints::new().with_pool("p2");

        let selected = scheduler
            .select_pool(GIB, &request, Vec::new(), &FilterChain::primary())
            .unwrap();
        assert_eq!(selected.qualified_name(), "array-b/p2");

        assert_matches!(
            scheduler.select_pool(GIB, &VolumeConstraints::new().with_pool("p9"), Vec::new(), &FilterChain::primary()),
            Err(Error::FilteredOut { stage: 2, key, .. }) if key == "pool"
        );
    }

    #[tokio::test]
    async fn test_no_available_backend() {
        let (config, adapter) = array("array-a", "p1", 100 * GIB, &[Capability::Thin]);
        let scheduler = scheduler(vec![(config, adapter.clone())]).await;
        adapter.set_failure(Some("link down".into()));
        RefreshEngine::new(scheduler.registry().clone())
            .refresh_all(RefreshMode::Asynchronous)
            .await
            .unwrap();

        assert_matches!(
            scheduler.select_storage_pool(GIB, &VolumeConstraints::new()),
            Err(Error::NoAvailablePool)
        );
    }

    fn zone(name: &str) -> crate::domain::ports::Topology {
        [("zone".to_string(), name.to_string())].into_iter().collect()
    }

    /// Two thin arrays with equal free capacity in zones a and b
    async fn zoned_pair() -> Scheduler {
        let (a, adapter_a) = array("array-a", "p1", 100 * GIB, &[Capability::Thin]);
        let (b, adapter_b) = array("array-b", "p2", 100 * GIB, &[Capability::Thin]);
        scheduler(vec![
            (a.with_topology(zone("a")), adapter_a),
            (b.with_topology(zone("b")), adapter_b),
        ])
        .await
    }

    #[tokio::test]
    async fn test_unmet_requisite_topology() {
        let scheduler = zoned_pair().await;
        let constraints = VolumeConstraints::new().with_topology(TopologyRequirement {
            requisite: vec![zone("c")],
            preferred: Vec::new(),
        });

        assert_matches!(
            scheduler.select_storage_pool(GIB, &constraints),
            Err(Error::TopologyUnsatisfied { .. })
        );
        assert_eq!(scheduler.registry().metrics().selections(outcome::SELECTED), 0);
    }

    #[tokio::test]
    async fn test_requisite_topology_restricts_candidates() {
        let scheduler = zoned_pair().await;
        let constraints = VolumeConstraints::new().with_topology(TopologyRequirement {
            requisite: vec![zone("a")],
            preferred: Vec::new(),
        });

        for _ in 0..8 {
            let selection = scheduler.select_storage_pool(GIB, &constraints).unwrap();
            assert_eq!(selection.local.backend, "array-a");
        }
    }

    #[tokio::test]
    async fn test_preferred_topology_breaks_free_capacity_tie() {
        let registry = zoned_pair().await.registry().clone();
        let constraints = VolumeConstraints::new().with_topology(TopologyRequirement {
            requisite: vec![zone("a"), zone("b")],
            preferred: vec![zone("b")],
        });

        for seed in 0..32 {
            let scheduler = Scheduler::with_seed(registry.clone(), seed);
            let selection = scheduler.select_storage_pool(GIB, &constraints).unwrap();
            assert_eq!(selection.local.backend, "array-b", "seed {}", seed);
        }
    }

    #[tokio::test]
    async fn test_equal_pools_spread_across_seeds() {
        let registry = zoned_pair().await.registry().clone();
        let thin = VolumeConstraints::new().with_alloc_type(AllocType::Thin);

        let winners: std::collections::BTreeSet<String> = (0..32)
            .map(|seed| {
                Scheduler::with_seed(registry.clone(), seed)
                    .select_storage_pool(GIB, &thin)
                    .unwrap()
                    .local
                    .backend
            })
            .collect();

        assert_eq!(
            winners.into_iter().collect::<Vec<_>>(),
            vec!["array-a", "array-b"]
        );
    }

    #[tokio::test]
    async fn test_object_pools_only_serve_object_volumes() {
        let (block, block_adapter) = array("array-a", "p1", 100 * GIB, &[Capability::Thin]);
        let (object, object_adapter) = array("objects-1", "b1", 150 * GIB, &[Capability::Thin]);
        let object = BackendConfig::new(object.name, StorageProduct::ObjectStore).with_pools(["b1"]);
        let scheduler = scheduler(vec![(block, block_adapter), (object, object_adapter)]).await;

        let selection = scheduler.select_storage_pool(GIB, &VolumeConstraints::new()).unwrap();
        assert_eq!(selection.local.qualified_name(), "array-a/p1");

        let mut parameters = std::collections::BTreeMap::new();
        parameters.insert("volumeType".to_string(), "object".to_string());
        let constraints = VolumeConstraints::from_parameters(&parameters).unwrap();
        let selection = scheduler.select_storage_pool(GIB, &constraints).unwrap();
        assert_eq!(selection.local.qualified_name(), "objects-1/b1");
        assert_eq!(selection.local.kind, StorageKind::Object);
    }

    #[tokio::test]
    async fn test_negative_size_rejected() {
        let scheduler = two_arrays().await;
        assert_matches!(
            scheduler.select_storage_pool(-1, &VolumeConstraints::new()),
            Err(Error::Configuration(_))
        );
    }
}
