//! Capability Refresh Module
//!
//! Keeps backend availability, capabilities and pool capacities current.

pub mod engine;

pub use engine::*;
