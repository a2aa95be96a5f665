//! Pool Scheduler Module
//!
//! Typed volume constraints, the pool filter chain, topology scoring and
//! the selection of local and paired pools.

pub mod constraints;
pub mod filters;
pub mod select;
pub mod topology;

pub use constraints::*;
pub use filters::{FilterChain, FilterFn, FleetView, PoolFilter};
pub use select::*;
pub use topology::*;
