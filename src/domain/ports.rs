//! Domain Ports - Core types and the storage adapter boundary
//!
//! The scheduler never talks to an array directly. Each storage product is
//! reached through a [`StorageAdapter`], which reports live capabilities and
//! per-pool capacity and is told about its mirror/replica partner.

use crate::config::BackendConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Storage Kinds
// =============================================================================

/// Storage families a pool can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Block,
    File,
    Object,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Block => write!(f, "block"),
            StorageKind::File => write!(f, "file"),
            StorageKind::Object => write!(f, "object"),
        }
    }
}

/// Storage products a backend can be configured as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageProduct {
    /// SAN array exposing LUNs out of storage pools
    BlockArray,
    /// NAS array exposing filesystems out of storage pools
    FileArray,
    /// Directory quotas under one parent filesystem; no pools of its own
    DirectoryQuota,
    /// Distributed NAS with a single global namespace
    ScaleOutNas,
    /// Object service exposing buckets out of storage pools
    ObjectStore,
}

impl StorageProduct {
    /// Storage family served by this product
    pub fn storage_kind(&self) -> StorageKind {
        match self {
            StorageProduct::BlockArray => StorageKind::Block,
            StorageProduct::FileArray
            | StorageProduct::DirectoryQuota
            | StorageProduct::ScaleOutNas => StorageKind::File,
            StorageProduct::ObjectStore => StorageKind::Object,
        }
    }

    /// Whether the product is configured with named sub-pools.
    ///
    /// Products without sub-pools are registered with a single synthetic
    /// pool named after the backend.
    pub fn has_sub_pools(&self) -> bool {
        !matches!(self, StorageProduct::DirectoryQuota)
    }

    /// Whether the product distinguishes thin from thick allocation
    pub fn distinguishes_alloc_type(&self) -> bool {
        matches!(self, StorageProduct::BlockArray | StorageProduct::FileArray)
    }
}

impl std::fmt::Display for StorageProduct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageProduct::BlockArray => write!(f, "block-array"),
            StorageProduct::FileArray => write!(f, "file-array"),
            StorageProduct::DirectoryQuota => write!(f, "directory-quota"),
            StorageProduct::ScaleOutNas => write!(f, "scale-out-nas"),
            StorageProduct::ObjectStore => write!(f, "object-store"),
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Capabilities a backend or pool may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Thin,
    Thick,
    Qos,
    HyperMetro,
    Replication,
    ApplicationType,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Thin => write!(f, "thin"),
            Capability::Thick => write!(f, "thick"),
            Capability::Qos => write!(f, "qos"),
            Capability::HyperMetro => write!(f, "hyper-metro"),
            Capability::Replication => write!(f, "replication"),
            Capability::ApplicationType => write!(f, "application-type"),
        }
    }
}

/// Capability name to support flag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeMap<Capability, bool>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of a supported capability
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability, true);
        self
    }

    pub fn set(&mut self, capability: Capability, supported: bool) {
        self.0.insert(capability, supported);
    }

    /// Absent capabilities are unsupported
    pub fn supports(&self, capability: Capability) -> bool {
        self.0.get(&capability).copied().unwrap_or(false)
    }

    /// Overlay `other` on top of `self`; entries in `other` win
    pub fn merged(&self, other: &CapabilitySet) -> CapabilitySet {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (*k, *v)));
        CapabilitySet(merged)
    }

    /// Capabilities whose support flag differs between `self` and `next`
    pub fn changes(&self, next: &CapabilitySet) -> Vec<Capability> {
        let mut keys: Vec<Capability> = self.0.keys().chain(next.0.keys()).copied().collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
            .filter(|cap| self.0.get(cap) != next.0.get(cap))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Capability, &bool)> {
        self.0.iter()
    }
}

impl FromIterator<(Capability, bool)> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = (Capability, bool)>>(iter: I) -> Self {
        CapabilitySet(iter.into_iter().collect())
    }
}

/// Node-placement label set, e.g. `{"topology.kubernetes.io/zone": "a"}`
pub type Topology = BTreeMap<String, String>;

// =============================================================================
// Capacity
// =============================================================================

/// Capacity of a pool in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacity {
    pub free: i64,
    pub total: i64,
    pub used: i64,
}

impl PoolCapacity {
    pub fn new(free: i64, total: i64) -> Self {
        Self {
            free,
            total,
            used: total - free,
        }
    }

    /// `0 <= free <= total`
    pub fn is_consistent(&self) -> bool {
        self.free >= 0 && self.free <= self.total
    }
}

/// One pool's entry in a capacity refresh response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReport {
    /// Pool-specific capabilities, overlaid on the backend's
    pub capabilities: CapabilitySet,
    pub capacity: PoolCapacity,
}

// =============================================================================
// Storage Adapter Port
// =============================================================================

/// Port to one storage array connection.
///
/// Implementations are read-only from the scheduler's point of view once
/// initialized; they are called outside the registry lock.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Authenticate and validate backend-specific configuration
    async fn init(&self, config: &BackendConfig) -> Result<()>;

    /// Query backend-wide capabilities
    async fn refresh_backend_capabilities(&self) -> Result<CapabilitySet>;

    /// Query capacity for the named pools. Pools the array does not know
    /// about are omitted from the result.
    async fn refresh_pool_capacities(
        &self,
        pool_names: &[String],
    ) -> Result<BTreeMap<String, PoolReport>>;

    /// Informs the adapter of its synchronous mirror partner
    fn notify_mirror_partner(&self, partner: StorageAdapterRef);

    /// Informs the adapter of its asynchronous replication partner
    fn notify_replica_partner(&self, partner: StorageAdapterRef);

    /// Name of the backend this adapter serves
    fn backend_name(&self) -> &str;
}

pub type StorageAdapterRef = Arc<dyn StorageAdapter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_properties() {
        assert_eq!(StorageProduct::BlockArray.storage_kind(), StorageKind::Block);
        assert_eq!(StorageProduct::DirectoryQuota.storage_kind(), StorageKind::File);
        assert!(!StorageProduct::DirectoryQuota.has_sub_pools());
        assert!(StorageProduct::ScaleOutNas.has_sub_pools());
        assert!(!StorageProduct::ScaleOutNas.distinguishes_alloc_type());
        assert!(StorageProduct::FileArray.distinguishes_alloc_type());
        assert_eq!(StorageProduct::ObjectStore.storage_kind(), StorageKind::Object);
        assert!(StorageProduct::ObjectStore.has_sub_pools());
        assert!(!StorageProduct::ObjectStore.distinguishes_alloc_type());
    }

    #[test]
    fn test_capability_merge_and_changes() {
        let backend = CapabilitySet::new()
            .with(Capability::Thin)
            .with(Capability::Qos);
        let mut pool = CapabilitySet::new();
        pool.set(Capability::Qos, false);
        pool.set(Capability::Thick, true);

        let merged = backend.merged(&pool);
        assert!(merged.supports(Capability::Thin));
        assert!(merged.supports(Capability::Thick));
        assert!(!merged.supports(Capability::Qos));
        assert!(!merged.supports(Capability::Replication));

        assert_eq!(
            backend.changes(&merged),
            vec![Capability::Thick, Capability::Qos]
        );
    }

    #[test]
    fn test_capacity_consistency() {
        assert!(PoolCapacity::new(10, 100).is_consistent());
        assert!(!PoolCapacity::new(-1, 100).is_consistent());
        assert!(!PoolCapacity::new(200, 100).is_consistent());
        assert_eq!(PoolCapacity::new(10, 100).used, 90);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", StorageKind::Block), "block");
        assert_eq!(format!("{}", StorageProduct::DirectoryQuota), "directory-quota");
        assert_eq!(format!("{}", Capability::HyperMetro), "hyper-metro");
    }
}
