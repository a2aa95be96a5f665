//! Backend Registry Module
//!
//! Registered backends, their pools, mirror/replica pairing and the events
//! emitted as their state changes.

pub mod backend;
pub mod backend_registry;
pub mod events;
pub mod pairing;

pub use backend::*;
pub use backend_registry::*;
pub use events::*;
pub use pairing::*;
