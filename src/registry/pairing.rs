//! Backend Pairing
//!
//! Links backends into mirror (HyperMetro) and replication pairs after every
//! backend is registered. A link is only made when both sides declare the
//! relationship and agree on it; anything else leaves both sides unpaired.

use super::backend::{Backend, BackendId};
use crate::config::PairingConfig;
use tracing::{info, warn};

/// Kind of cross-backend relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Synchronous active-active mirror
    Mirror,
    /// Asynchronous replication
    Replica,
}

impl Relation {
    fn declared(self, backend: &Backend) -> Option<&PairingConfig> {
        match self {
            Relation::Mirror => backend.config.mirror.as_ref(),
            Relation::Replica => backend.config.replica.as_ref(),
        }
    }

    fn partner(self, backend: &Backend) -> Option<BackendId> {
        match self {
            Relation::Mirror => backend.mirror_partner,
            Relation::Replica => backend.replica_partner,
        }
    }

    fn link(self, backend: &mut Backend, partner: BackendId) {
        match self {
            Relation::Mirror => backend.mirror_partner = Some(partner),
            Relation::Replica => backend.replica_partner = Some(partner),
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Relation::Mirror => write!(f, "hyper-metro"),
            Relation::Replica => write!(f, "replication"),
        }
    }
}

/// Whether two declarations describe the same relationship
fn is_mutual(a: &Backend, a_cfg: &PairingConfig, b: &Backend, b_cfg: &PairingConfig) -> bool {
    let domains_agree = match (&a_cfg.domain, &b_cfg.domain) {
        (Some(x), Some(y)) => x == y,
        (None, None) => true,
        _ => false,
    };
    let a_names_b = a_cfg.partner.as_ref().map_or(true, |p| *p == b.name);
    let b_names_a = b_cfg.partner.as_ref().map_or(true, |p| *p == a.name);
    domains_agree && a_names_b && b_names_a
}

/// Run one pairing pass, linking the first mutual match for every unpaired
/// backend. Returns the pairs that were linked.
pub fn pair_backends(backends: &mut [Backend], relation: Relation) -> Vec<(BackendId, BackendId)> {
    let mut linked = Vec::new();

    for i in 0..backends.len() {
        if relation.partner(&backends[i]).is_some() {
            continue;
        }
        let Some(declared) = relation.declared(&backends[i]).cloned() else {
            continue;
        };
        if declared.partner.as_deref() == Some(backends[i].name.as_str()) {
            warn!(
                "Backend {} names itself as its {} partner; {} unsupported",
                backends[i].name, relation, relation
            );
            continue;
        }

        let found = (0..backends.len()).find(|&j| {
            j != i
                && relation.partner(&backends[j]).is_none()
                && backends[j].storage_kind() == backends[i].storage_kind()
                && relation.declared(&backends[j]).map_or(false, |other| {
                    is_mutual(&backends[i], &declared, &backends[j], other)
                })
        });

        match found {
            Some(j) => {
                let (a, b) = (backends[i].id, backends[j].id);
                relation.link(&mut backends[i], b);
                relation.link(&mut backends[j], a);
                info!(
                    "Paired backends {} <-> {} ({})",
                    backends[i].name, backends[j].name, relation
                );
                linked.push((a, b));
            }
            None => warn!(
                "Backend {} declares {} but no backend reciprocates; {} unsupported",
                backends[i].name, relation, relation
            ),
        }
    }

    linked
}
