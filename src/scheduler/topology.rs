//! Topology Stage
//!
//! Requisite topologies are an OR across label sets and an AND across the
//! keys inside one set. A backend that declares no topologies is reachable
//! from everywhere.

use super::constraints::TopologyRequirement;
use super::filters::FleetView;
use crate::domain::ports::Topology;
use crate::error::{Error, Result};
use crate::registry::{Backend, PoolRef};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Whether a backend's declared topology is satisfied by a requested label set
pub fn topology_matches(supported: &Topology, requested: &Topology) -> bool {
    supported
        .iter()
        .all(|(key, value)| requested.get(key) == Some(value))
}

/// Whether a backend can serve any of the requested label sets
pub fn backend_accessible(backend: &Backend, requested: &[Topology]) -> bool {
    backend.supported_topologies.is_empty()
        || backend
            .supported_topologies
            .iter()
            .any(|supported| requested.iter().any(|r| topology_matches(supported, r)))
}

/// Drop pools whose backend cannot reach any requisite topology
pub fn filter_by_requisite(
    requirement: &TopologyRequirement,
    view: &FleetView<'_>,
    pools: Vec<PoolRef>,
) -> Result<Vec<PoolRef>> {
    if requirement.requisite.is_empty() {
        return Ok(pools);
    }

    let (kept, rejected): (Vec<_>, Vec<_>) = pools
        .into_iter()
        .partition(|p| backend_accessible(view.backend(*p), &requirement.requisite));

    debug!(
        "Topology stage kept {} pools, rejected {}",
        kept.len(),
        rejected.len()
    );

    if kept.is_empty() {
        return Err(Error::TopologyUnsatisfied {
            requisite: serde_json::to_string(&requirement.requisite)?,
            rejected: view.names(&rejected),
        });
    }
    Ok(kept)
}

/// Order pools by preferred topology, highest priority first.
///
/// Each preference bucket is shuffled so equally preferred pools do not
/// always resolve to the same winner. Pools matching no preference are
/// shuffled and placed last.
pub fn order_by_preference<R: Rng + ?Sized>(
    requirement: &TopologyRequirement,
    view: &FleetView<'_>,
    mut remaining: Vec<PoolRef>,
    rng: &mut R,
) -> Vec<PoolRef> {
    let mut ordered = Vec::with_capacity(remaining.len());

    for preferred in &requirement.preferred {
        let (mut bucket, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|p| {
            backend_accessible(view.backend(*p), std::slice::from_ref(preferred))
        });
        bucket.shuffle(rng);
        ordered.append(&mut bucket);
        remaining = rest;
    }

    remaining.shuffle(rng);
    ordered.append(&mut remaining);
    ordered
}
