//! Registry Events
//!
//! Events emitted by the backend registry so external consumers can follow
//! pairing, availability and capability/capacity transitions.

use crate::domain::ports::Capability;
use serde::{Deserialize, Serialize};

/// Events emitted by the backend registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// Two backends were linked as mirror or replication partners
    BackendsPaired {
        relation: String,
        first: String,
        second: String,
    },

    /// A backend's availability flipped after a refresh
    BackendAvailabilityChanged { backend: String, available: bool },

    /// Backend-wide capabilities changed
    BackendCapabilitiesChanged {
        backend: String,
        changed: Vec<Capability>,
    },

    /// A pool's effective capabilities changed
    PoolCapabilitiesChanged {
        backend: String,
        pool: String,
        changed: Vec<Capability>,
    },

    /// A pool's capacity changed during refresh
    PoolCapacityChanged {
        backend: String,
        pool: String,
        previous_free: i64,
        free: i64,
        total: i64,
    },

    /// A configured pool was absent from the array's response
    PoolMissing { backend: String, pool: String },

    /// Thick capacity was reserved by the scheduler
    CapacityReserved {
        backend: String,
        pool: String,
        bytes: i64,
        remaining: i64,
    },
}

impl RegistryEvent {
    /// Backend the event concerns (the first one for pairings)
    pub fn backend(&self) -> &str {
        match self {
            RegistryEvent::BackendsPaired { first, .. } => first,
            RegistryEvent::BackendAvailabilityChanged { backend, .. }
            | RegistryEvent::BackendCapabilitiesChanged { backend, .. }
            | RegistryEvent::PoolCapabilitiesChanged { backend, .. }
            | RegistryEvent::PoolCapacityChanged { backend, .. }
            | RegistryEvent::PoolMissing { backend, .. }
            | RegistryEvent::CapacityReserved { backend, .. } => backend,
        }
    }
}
