//! Pool Filter Chain
//!
//! An ordered list of constraint predicates that narrows a candidate pool
//! set. Each predicate only removes pools and ignores the order of its
//! input, so the surviving set does not depend on chain order.

use super::constraints::{AllocType, ConstraintKey, VolumeConstraints};
use crate::domain::ports::Capability;
use crate::error::{Error, Result};
use crate::registry::{Backend, FleetState, Pool, PoolRef};
use tracing::debug;

// =============================================================================
// Fleet View
// =============================================================================

/// Read view of the fleet while the registry lock is held
#[derive(Clone, Copy)]
pub struct FleetView<'a> {
    pub backends: &'a [Backend],
    pub state: &'a FleetState,
}

impl<'a> FleetView<'a> {
    pub fn pool(&self, pool: PoolRef) -> &'a Pool {
        self.state.pool(pool)
    }

    pub fn backend(&self, pool: PoolRef) -> &'a Backend {
        &self.backends[pool.backend.0]
    }

    pub fn names(&self, pools: &[PoolRef]) -> Vec<String> {
        self.state.qualified_names(pools)
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Predicate over a candidate list
pub type FilterFn = fn(&VolumeConstraints, &FleetView<'_>, Vec<PoolRef>) -> Vec<PoolRef>;

/// One stage of a filter chain
#[derive(Clone, Copy)]
pub struct PoolFilter {
    pub key: ConstraintKey,
    pub apply: FilterFn,
}

impl PoolFilter {
    pub const fn new(key: ConstraintKey, apply: FilterFn) -> Self {
        Self { key, apply }
    }
}

impl std::fmt::Debug for PoolFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PoolFilter({})", self.key)
    }
}

pub const BACKEND_FILTER: PoolFilter = PoolFilter::new(ConstraintKey::Backend, filter_by_backend);
pub const POOL_FILTER: PoolFilter = PoolFilter::new(ConstraintKey::Pool, filter_by_pool);
pub const VOLUME_TYPE_FILTER: PoolFilter =
    PoolFilter::new(ConstraintKey::VolumeType, filter_by_volume_type);
pub const ALLOC_TYPE_FILTER: PoolFilter =
    PoolFilter::new(ConstraintKey::AllocType, filter_by_alloc_type);
pub const QOS_FILTER: PoolFilter = PoolFilter::new(ConstraintKey::Qos, filter_by_qos);
pub const HYPER_METRO_FILTER: PoolFilter =
    PoolFilter::new(ConstraintKey::HyperMetro, filter_by_hyper_metro);
pub const REPLICATION_FILTER: PoolFilter =
    PoolFilter::new(ConstraintKey::Replication, filter_by_replication);
pub const APPLICATION_TYPE_FILTER: PoolFilter =
    PoolFilter::new(ConstraintKey::ApplicationType, filter_by_application_type);

fn filter_by_backend(c: &VolumeConstraints, view: &FleetView<'_>, pools: Vec<PoolRef>) -> Vec<PoolRef> {
    match &c.backend {
        Some(name) => pools
            .into_iter()
            .filter(|p| view.backend(*p).name == *name)
            .collect(),
        None => pools,
    }
}

fn filter_by_pool(c: &VolumeConstraints, view: &FleetView<'_>, pools: Vec<PoolRef>) -> Vec<PoolRef> {
    match &c.pool {
        Some(name) => pools
            .into_iter()
            .filter(|p| view.pool(*p).name == *name)
            .collect(),
        None => pools,
    }
}

fn filter_by_volume_type(
    c: &VolumeConstraints,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Vec<PoolRef> {
    let kind = c.volume_kind();
    pools
        .into_iter()
        .filter(|p| view.pool(*p).kind == kind)
        .collect()
}

fn filter_by_alloc_type(
    c: &VolumeConstraints,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Vec<PoolRef> {
    let Some(alloc_type) = c.alloc_type else {
        return pools;
    };
    let capability = match alloc_type {
        AllocType::Thin => Capability::Thin,
        AllocType::Thick => Capability::Thick,
    };
    pools
        .into_iter()
        .filter(|p| {
            // Products without a thin/thick distinction accept either
            !view.backend(*p).product.distinguishes_alloc_type()
                || view.pool(*p).capabilities.supports(capability)
        })
        .collect()
}

fn filter_by_capability(
    required: bool,
    capability: Capability,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Vec<PoolRef> {
    if !required {
        return pools;
    }
    pools
        .into_iter()
        .filter(|p| view.pool(*p).capabilities.supports(capability))
        .collect()
}

fn filter_by_qos(c: &VolumeConstraints, view: &FleetView<'_>, pools: Vec<PoolRef>) -> Vec<PoolRef> {
    filter_by_capability(c.qos.is_some(), Capability::Qos, view, pools)
}

fn filter_by_application_type(
    c: &VolumeConstraints,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Vec<PoolRef> {
    filter_by_capability(
        c.application_type.is_some(),
        Capability::ApplicationType,
        view,
        pools,
    )
}

/// Keep pools with the capability whose backend has an available partner
fn filter_by_partner(
    required: bool,
    capability: Capability,
    partner: fn(&Backend) -> Option<crate::registry::BackendId>,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Vec<PoolRef> {
    if !required {
        return pools;
    }
    pools
        .into_iter()
        .filter(|p| {
            view.pool(*p).capabilities.supports(capability)
                && partner(view.backend(*p)).map_or(false, |id| view.state.is_available(id))
        })
        .collect()
}

fn filter_by_hyper_metro(
    c: &VolumeConstraints,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Vec<PoolRef> {
    filter_by_partner(
        c.hyper_metro,
        Capability::HyperMetro,
        |b| b.mirror_partner,
        view,
        pools,
    )
}

fn filter_by_replication(
    c: &VolumeConstraints,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Vec<PoolRef> {
    filter_by_partner(
        c.replication,
        Capability::Replication,
        |b| b.replica_partner,
        view,
        pools,
    )
}

// =============================================================================
// Filter Chain
// =============================================================================

/// Ordered sequence of pool filters
#[derive(Debug, Clone)]
pub struct FilterChain {
    filters: Vec<PoolFilter>,
}

impl FilterChain {
    pub fn new(filters: Vec<PoolFilter>) -> Self {
        Self { filters }
    }

    /// Chain for the local side of a request
    pub fn primary() -> Self {
        Self::new(vec![
            BACKEND_FILTER,
            POOL_FILTER,
            VOLUME_TYPE_FILTER,
            ALLOC_TYPE_FILTER,
            QOS_FILTER,
            HYPER_METRO_FILTER,
            REPLICATION_FILTER,
            APPLICATION_TYPE_FILTER,
        ])
    }

    /// Chain for the partner side of a mirrored or replicated request.
    ///
    /// Backend and pool pins name the local side, so they are left out.
    pub fn secondary() -> Self {
        Self::new(vec![
            VOLUME_TYPE_FILTER,
            ALLOC_TYPE_FILTER,
            QOS_FILTER,
            REPLICATION_FILTER,
            APPLICATION_TYPE_FILTER,
        ])
    }

    pub fn filters(&self) -> &[PoolFilter] {
        &self.filters
    }

    /// Apply every stage in order; fails at the first stage that leaves
    /// nothing, naming its constraint and the pools it rejected.
    pub fn run(
        &self,
        constraints: &VolumeConstraints,
        view: &FleetView<'_>,
        mut candidates: Vec<PoolRef>,
    ) -> Result<Vec<PoolRef>> {
        for (index, filter) in self.filters.iter().enumerate() {
            let before = candidates.clone();
            candidates = (filter.apply)(constraints, view, candidates);
            debug!(
                "Filter stage {} ({}): {} -> {} candidates",
                index + 1,
                filter.key,
                before.len(),
                candidates.len()
            );
            if candidates.is_empty() {
                return Err(Error::FilteredOut {
                    stage: index + 1,
                    key: filter.key.to_string(),
                    value: constraints.value(filter.key),
                    rejected: view.names(&before),
                });
            }
        }
        Ok(candidates)
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::primary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticArrayAdapter;
    use crate::config::{BackendConfig, PairingConfig};
    use crate::domain::ports::{CapabilitySet, PoolCapacity, StorageKind, StorageProduct};
    use crate::registry::{pair_backends, BackendId, Relation};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    struct Fleet {
        backends: Vec<Backend>,
        state: FleetState,
    }

    impl Fleet {
        fn view(&self) -> FleetView<'_> {
            FleetView {
                backends: &self.backends,
                state: &self.state,
            }
        }

        fn all(&self) -> Vec<PoolRef> {
            self.state.available_pools()
        }
    }

    /// array-a: thin+thick+qos, mirrored with array-b
    /// array-b: thin only, mirrored with array-a
    /// nas-c:   file, thin, application-type
    /// scale-d: scale-out NAS reporting no alloc capabilities
    fn fleet() -> Fleet {
        let configs = vec![
            BackendConfig::new("array-a", StorageProduct::BlockArray)
                .with_pools(["p1"])
                .with_mirror(PairingConfig::partner("array-b")),
            BackendConfig::new("array-b", StorageProduct::BlockArray)
                .with_pools(["p2"])
                .with_mirror(PairingConfig::partner("array-a")),
            BackendConfig::new("nas-c", StorageProduct::FileArray).with_pools(["fs1"]),
            BackendConfig::new("scale-d", StorageProduct::ScaleOutNas).with_pools(["global"]),
        ];
        let mut backends: Vec<Backend> = configs
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let adapter = Arc::new(StaticArrayAdapter::new(c.name.clone()));
                Backend::new(BackendId(i), c, adapter)
            })
            .collect();
        pair_backends(&mut backends, Relation::Mirror);

        let mut state = FleetState::new(&backends);
        let caps = [
            CapabilitySet::new()
                .with(Capability::Thin)
                .with(Capability::Thick)
                .with(Capability::Qos)
                .with(Capability::HyperMetro),
            CapabilitySet::new().with(Capability::Thin).with(Capability::HyperMetro),
            CapabilitySet::new()
                .with(Capability::Thin)
                .with(Capability::ApplicationType),
            CapabilitySet::new(),
        ];
        for (i, caps) in caps.into_iter().enumerate() {
            let backend = state.backend_mut(BackendId(i));
            backend.available = true;
            backend.pools[0].capabilities = caps;
            backend.pools[0].capacity = PoolCapacity::new(100, 200);
        }
        Fleet { backends, state }
    }

    fn survivors(fleet: &Fleet, chain: &FilterChain, c: &VolumeConstraints) -> Vec<String> {
        let mut names = fleet.view().names(&chain.run(c, &fleet.view(), fleet.all()).unwrap());
        names.sort();
        names
    }

    #[test]
    fn test_pins() {
        let fleet = fleet();
        let chain = FilterChain::primary();
        assert_eq!(
            survivors(&fleet, &chain, &VolumeConstraints::new().with_backend("array-b")),
            vec!["array-b/p2"]
        );
        assert_eq!(
            survivors(&fleet, &chain, &VolumeConstraints::new().with_pool("p1")),
            vec!["array-a/p1"]
        );
    }

    #[test]
    fn test_volume_type_defaults_to_block() {
        let fleet = fleet();
        let chain = FilterChain::primary();
        assert_eq!(
            survivors(&fleet, &chain, &VolumeConstraints::new()),
            vec!["array-a/p1", "array-b/p2"]
        );
        assert_eq!(
            survivors(
                &fleet,
                &chain,
                &VolumeConstraints::new().with_volume_type(StorageKind::File)
            ),
            vec!["nas-c/fs1", "scale-d/global"]
        );
    }

    #[test]
    fn test_alloc_type_with_appliance_exception() {
        let fleet = fleet();
        let chain = FilterChain::primary();
        assert_eq!(
            survivors(
                &fleet,
                &chain,
                &VolumeConstraints::new().with_alloc_type(AllocType::Thick)
            ),
            vec!["array-a/p1"]
        );
        // scale-d reports neither thin nor thick but does not distinguish them
        assert_eq!(
            survivors(
                &fleet,
                &chain,
                &VolumeConstraints::new()
                    .with_volume_type(StorageKind::File)
                    .with_alloc_type(AllocType::Thick)
            ),
            vec!["scale-d/global"]
        );
    }

    #[test]
    fn test_capability_filters() {
        let fleet = fleet();
        let chain = FilterChain::primary();
        assert_eq!(
            survivors(&fleet, &chain, &VolumeConstraints::new().with_qos("{}")),
            vec!["array-a/p1"]
        );
        assert_eq!(
            survivors(
                &fleet,
                &chain,
                &VolumeConstraints::new()
                    .with_volume_type(StorageKind::File)
                    .with_application_type("Oracle")
            ),
            vec!["nas-c/fs1"]
        );
        assert_eq!(
            survivors(&fleet, &chain, &VolumeConstraints::new().with_hyper_metro()),
            vec!["array-a/p1", "array-b/p2"]
        );
    }

    #[test]
    fn test_hyper_metro_requires_available_partner() {
        let mut fleet = fleet();
        fleet.state.backend_mut(BackendId(1)).available = false;

        let result = FilterChain::primary().run(
            &VolumeConstraints::new().with_hyper_metro(),
            &fleet.view(),
            fleet.all(),
        );

        assert_matches!(
            result,
            Err(Error::FilteredOut { stage: 6, ref key, ref rejected, .. })
                if key == "hyperMetro" && rejected == &vec!["array-a/p1".to_string()]
        );
    }

    #[test]
    fn test_replication_without_partner_filtered() {
        let fleet = fleet();
        let result = FilterChain::primary().run(
            &VolumeConstraints::new().with_replication(),
            &fleet.view(),
            fleet.all(),
        );
        assert_matches!(result, Err(Error::FilteredOut { ref key, .. }) if key == "replication");
    }

    #[test]
    fn test_secondary_chain_ignores_pins() {
        let fleet = fleet();
        let c = VolumeConstraints::new()
            .with_backend("array-a")
            .with_pool("p1");
        assert_eq!(
            survivors(&fleet, &FilterChain::secondary(), &c),
            vec!["array-a/p1", "array-b/p2"]
        );
    }

    #[test]
    fn test_surviving_set_independent_of_order() {
        let fleet = fleet();
        let requests = [
            VolumeConstraints::new().with_alloc_type(AllocType::Thin),
            VolumeConstraints::new().with_hyper_metro().with_alloc_type(AllocType::Thin),
            VolumeConstraints::new().with_qos("{}").with_alloc_type(AllocType::Thick),
            VolumeConstraints::new().with_volume_type(StorageKind::File),
        ];
        let forward = FilterChain::primary();
        let mut reversed_filters = forward.filters().to_vec();
        reversed_filters.reverse();
        let reversed = FilterChain::new(reversed_filters);
        let mut rotated_filters = forward.filters().to_vec();
        rotated_filters.rotate_left(3);
        let rotated = FilterChain::new(rotated_filters);

        for c in &requests {
            let expected = survivors(&fleet, &forward, c);
            assert_eq!(survivors(&fleet, &reversed, c), expected);
            assert_eq!(survivors(&fleet, &rotated, c), expected);
        }
    }
}
