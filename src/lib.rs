//! Storage Fleet Scheduler - Backend Registry and Pool Scheduling
//!
//! Exposes a fleet of independently reachable block and file arrays, with
//! their synchronous mirror and asynchronous replica partners, as one pool
//! from which a provisioning caller requests capacity under constraints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                      Provisioning Caller (external)                          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────────────────────────────────────────────────────┐  │
//! │  │                          Pool Scheduler                                │  │
//! │  │  filter chain ─► topology ─► capacity ─► max free ─► paired partner    │  │
//! │  └───────────────────────────────────┬───────────────────────────────────┘  │
//! │                                      │                                       │
//! │                    ┌─────────────────┴─────────────────┐                    │
//! │                    │         Backend Registry          │                    │
//! │                    │  (backends + one-lock fleet state)│                    │
//! │                    └─────────────────┬─────────────────┘                    │
//! │                                      │                                       │
//! │                    ┌─────────────────┴─────────────────┐                    │
//! │                    │     Capability Refresh Engine     │                    │
//! │                    │   (one task per backend, timed)   │                    │
//! │                    └─────────────────┬─────────────────┘                    │
//! ├──────────────────────────────────────┼──────────────────────────────────────┤
//! │                          Storage Adapters                                    │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Block Array    │  │   File Array    │  │  Directory Quota / Scale-out │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: Registered backends, pools, pairing and events
//! - [`refresh`]: Concurrent, fault-isolated capability refresh
//! - [`scheduler`]: Constraints, filter chain, topology and pool selection
//! - [`adapters`]: Storage adapter factory and the static array adapter
//! - [`config`]: Fleet configuration
//! - [`domain`]: Core domain types and the adapter port
//! - [`metrics`]: Prometheus collectors
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod refresh;
pub mod registry;
pub mod scheduler;

// Re-export commonly used types
pub use adapters::{AdapterFactory, StaticArrayAdapter};

pub use config::{parse_capacity, BackendConfig, FleetConfig, PairingConfig};

pub use domain::ports::{
    Capability, CapabilitySet, PoolCapacity, PoolReport, StorageAdapter, StorageAdapterRef,
    StorageKind, StorageProduct, Topology,
};

pub use error::{Error, ErrorClass, Result};

pub use metrics::Metrics;

pub use refresh::{RefreshEngine, RefreshMode, RefreshReport};

pub use registry::{
    Backend, BackendId, Pool, PoolRef, Registry, RegistryEvent, RegistryStats, Relation,
};

pub use scheduler::{
    AllocType, FilterChain, PoolSelection, Scheduler, SelectedPool, TopologyRequirement,
    VolumeConstraints,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
