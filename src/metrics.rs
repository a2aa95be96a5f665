//! Scheduler Metrics
//!
//! Prometheus collectors for scheduling outcomes, refresh failures, backend
//! availability and per-pool free capacity. Each [`Metrics`] owns its own
//! `prometheus::Registry` so several registries can coexist in one process.

use crate::error::Result;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, TextEncoder};

/// Outcome label values for `fleet_scheduler_selections_total`
pub mod outcome {
    pub const SELECTED: &str = "selected";
    pub const PAIRED: &str = "paired";
    pub const REJECTED: &str = "rejected";
    pub const EXHAUSTED: &str = "exhausted";
}

/// Collectors exported by the scheduler
#[derive(Clone)]
pub struct Metrics {
    registry: prometheus::Registry,
    selections: IntCounterVec,
    refresh_failures: IntCounterVec,
    backend_available: IntGaugeVec,
    pool_free_bytes: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = prometheus::Registry::new();

        let selections = IntCounterVec::new(
            Opts::new(
                "fleet_scheduler_selections_total",
                "Pool selection requests by outcome",
            ),
            &["outcome"],
        )?;
        let refresh_failures = IntCounterVec::new(
            Opts::new(
                "fleet_scheduler_refresh_failures_total",
                "Failed capability refreshes by backend",
            ),
            &["backend"],
        )?;
        let backend_available = IntGaugeVec::new(
            Opts::new(
                "fleet_scheduler_backend_available",
                "1 if the backend's last capability refresh succeeded",
            ),
            &["backend"],
        )?;
        let pool_free_bytes = IntGaugeVec::new(
            Opts::new(
                "fleet_scheduler_pool_free_bytes",
                "Free capacity of a pool as last seen by the scheduler",
            ),
            &["backend", "pool"],
        )?;

        registry.register(Box::new(selections.clone()))?;
        registry.register(Box::new(refresh_failures.clone()))?;
        registry.register(Box::new(backend_available.clone()))?;
        registry.register(Box::new(pool_free_bytes.clone()))?;

        Ok(Self {
            registry,
            selections,
            refresh_failures,
            backend_available,
            pool_free_bytes,
        })
    }

    pub fn record_selection(&self, outcome: &str) {
        self.selections.with_label_values(&[outcome]).inc();
    }

    pub fn record_refresh_failure(&self, backend: &str) {
        self.refresh_failures.with_label_values(&[backend]).inc();
    }

    pub fn set_backend_available(&self, backend: &str, available: bool) {
        self.backend_available
            .with_label_values(&[backend])
            .set(i64::from(available));
    }

    pub fn set_pool_free(&self, backend: &str, pool: &str, free: i64) {
        self.pool_free_bytes
            .with_label_values(&[backend, pool])
            .set(free);
    }

    pub fn selections(&self, outcome: &str) -> u64 {
        self.selections.with_label_values(&[outcome]).get()
    }

    pub fn refresh_failures(&self, backend: &str) -> u64 {
        self.refresh_failures.with_label_values(&[backend]).get()
    }

    /// Render all collectors in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
