//! Error types for the Storage Fleet Scheduler
//!
//! Provides structured error types for registration, capability refresh and
//! pool scheduling. Every scheduling failure names the constraint that
//! rejected the request and, where it applies, the pools that were rejected.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the scheduler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid backend name {name:?}: only letters, digits, '_' and '-' are allowed")]
    InvalidBackendName { name: String },

    #[error("Backend already registered: {name}")]
    DuplicateBackend { name: String },

    #[error("Unknown constraint key: {key}")]
    UnknownConstraint { key: String },

    #[error("Invalid value {value:?} for constraint {key}")]
    InvalidConstraint { key: String, value: String },

    #[error("Constraints {first} and {second} cannot both be requested for one volume")]
    MutuallyExclusiveConstraints { first: String, second: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend not found: {backend}")]
    BackendNotFound { backend: String },

    #[error("Adapter initialization failed for backend {backend}: {reason}")]
    AdapterInit { backend: String, reason: String },

    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("Capability refresh of backend {backend} timed out after {timeout:?}")]
    RefreshTimeout { backend: String, timeout: Duration },

    #[error("Capability refresh of backend {backend} panicked: {reason}")]
    RefreshPanicked { backend: String, reason: String },

    #[error("Backend {backend} reported {reported} of {configured} configured pools (missing: {})", .missing.join(", "))]
    IncompletePoolCapacity {
        backend: String,
        configured: usize,
        reported: usize,
        missing: Vec<String>,
    },

    // =========================================================================
    // Scheduling Errors
    // =========================================================================
    #[error("No available storage pool")]
    NoAvailablePool,

    #[error("All pools removed by filter at stage {stage} ({key}={value:?}); rejected: [{}]", .rejected.join(", "))]
    FilteredOut {
        stage: usize,
        key: String,
        value: String,
        rejected: Vec<String>,
    },

    #[error("No pool support by requisite topologies {requisite}; rejected: [{}]", .rejected.join(", "))]
    TopologyUnsatisfied {
        requisite: String,
        rejected: Vec<String>,
    },

    #[error("Cannot select a storage pool for {size} bytes; rejected: [{}]", .rejected.join(", "))]
    InsufficientCapacity { size: i64, rejected: Vec<String> },

    #[error("No paired backend for {relation} volume on backend {backend}")]
    NoPairedBackend { relation: String, backend: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification of an error, used to decide whether retrying helps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad configuration or request; fails fast and is never retried
    Configuration,
    /// A backend could not be reached; the next refresh cycle retries it
    Transient,
    /// No pool survived the scheduling stages
    Exhausted,
    /// An internal defect
    Internal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Configuration(_)
            | Error::InvalidBackendName { .. }
            | Error::DuplicateBackend { .. }
            | Error::UnknownConstraint { .. }
            | Error::InvalidConstraint { .. }
            | Error::MutuallyExclusiveConstraints { .. }
            | Error::BackendNotFound { .. }
            | Error::AdapterInit { .. }
            | Error::CapacityParse(_)
            | Error::YamlParse(_) => ErrorClass::Configuration,

            Error::BackendUnavailable { .. }
            | Error::BackendOperationFailed { .. }
            | Error::RefreshTimeout { .. }
            | Error::IncompletePoolCapacity { .. }
            | Error::Io(_) => ErrorClass::Transient,

            Error::NoAvailablePool
            | Error::FilteredOut { .. }
            | Error::TopologyUnsatisfied { .. }
            | Error::InsufficientCapacity { .. }
            | Error::NoPairedBackend { .. } => ErrorClass::Exhausted,

            Error::Internal(_)
            | Error::RefreshPanicked { .. }
            | Error::Json(_)
            | Error::Metrics(_) => ErrorClass::Internal,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.class(), ErrorClass::Configuration)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }
}

/// Result type alias for the scheduler
pub type Result<T> = std::result::Result<T, Error>;
