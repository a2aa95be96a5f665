//! Domain Module
//!
//! Core domain types and the adapter port.

pub mod ports;

pub use ports::*;
