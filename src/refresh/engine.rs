//! Capability Refresh Engine
//!
//! Queries every backend's live capabilities and pool capacities and writes
//! them into the registry. Each backend is refreshed in its own task; a
//! failure, timeout or panic in one task only marks that backend unavailable.

use crate::domain::ports::{CapabilitySet, PoolReport};
use crate::error::{Error, Result};
use crate::registry::{BackendId, Registry, RegistryEvent};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default per-backend refresh timeout
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Refresh Mode / Report
// =============================================================================

/// How a refresh pass treats per-backend problems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Fail the pass if any backend fails or reports fewer pools than configured
    Synchronous,
    /// Isolate failures; a failing backend is only marked unavailable
    Asynchronous,
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    /// Backends refreshed successfully
    pub refreshed: Vec<String>,
    /// Backends that failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Configured pools missing from a successful response
    pub missing_pools: Vec<String>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.missing_pools.is_empty()
    }
}

// =============================================================================
// Refresh Engine
// =============================================================================

/// Refreshes backend capability and capacity state
#[derive(Clone)]
pub struct RefreshEngine {
    registry: Arc<Registry>,
    timeout: Duration,
}

impl RefreshEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Bound every backend's refresh by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refresh every backend once
    pub async fn refresh_all(&self, mode: RefreshMode) -> Result<RefreshReport> {
        let handles: Vec<_> = self
            .registry
            .backends()
            .iter()
            .map(|backend| {
                let registry = self.registry.clone();
                let id = backend.id;
                let timeout = self.timeout;
                (id, tokio::spawn(refresh_backend(registry, id, timeout)))
            })
            .collect();

        let mut report = RefreshReport::default();
        let mut first_error = None;

        for (id, handle) in handles {
            let name = self.registry.backend_by_id(id).name.clone();
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(panic_error(&name, join_error)),
            };

            match outcome {
                Ok(missing) => {
                    if mode == RefreshMode::Synchronous && !missing.is_empty() && first_error.is_none() {
                        let configured = self.registry.backend_by_id(id).pool_names().len();
                        first_error = Some(Error::IncompletePoolCapacity {
                            backend: name.clone(),
                            configured,
                            reported: configured - missing.len(),
                            missing: missing.clone(),
                        });
                    }
                    report
                        .missing_pools
                        .extend(missing.into_iter().map(|pool| format!("{}/{}", name, pool)));
                    report.refreshed.push(name);
                }
                Err(e) => {
                    warn!("Capability refresh failed for backend {}: {}", name, e);
                    mark_unavailable(&self.registry, id);
                    self.registry.metrics().record_refresh_failure(&name);
                    report.failed.push((name, e.to_string()));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        info!(
            "Refresh pass ({:?}) complete: {} refreshed, {} failed",
            mode,
            report.refreshed.len(),
            report.failed.len()
        );

        match (mode, first_error) {
            (RefreshMode::Synchronous, Some(e)) => Err(e),
            _ => Ok(report),
        }
    }

    /// Run an asynchronous refresh pass every `interval` until cancelled
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already refreshed.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Periodic refresh stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_all(RefreshMode::Asynchronous).await {
                        error!("Periodic refresh pass failed: {}", e);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RefreshEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshEngine")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Per-Backend Refresh
// =============================================================================

/// Fetch one backend's state and apply it. Returns configured pools that
/// were missing from the response.
async fn refresh_backend(
    registry: Arc<Registry>,
    id: BackendId,
    timeout: Duration,
) -> Result<Vec<String>> {
    let backend = registry.backend_by_id(id);
    let adapter = backend.adapter();
    let pool_names = backend.pool_names();

    let fetch = async {
        let capabilities = adapter.refresh_backend_capabilities().await?;
        let pools = adapter.refresh_pool_capacities(&pool_names).await?;
        Ok::<_, Error>((capabilities, pools))
    };

    let (capabilities, pools) = tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| Error::RefreshTimeout {
            backend: backend.name.clone(),
            timeout,
        })??;

    Ok(apply_refresh(&registry, id, capabilities, pools))
}

/// Write a refresh result under the registry lock, then publish the
/// transitions it caused.
fn apply_refresh(
    registry: &Registry,
    id: BackendId,
    capabilities: CapabilitySet,
    reports: BTreeMap<String, PoolReport>,
) -> Vec<String> {
    let backend = registry.backend_by_id(id);
    let mut events = Vec::new();
    let mut missing = Vec::new();
    let mut free_gauges = Vec::new();

    {
        let mut state = registry.lock();
        let backend_state = state.backend_mut(id);

        let changed = backend_state.capabilities.changes(&capabilities);
        if !changed.is_empty() {
            info!("Backend {} capabilities changed: {:?}", backend.name, changed);
            events.push(RegistryEvent::BackendCapabilitiesChanged {
                backend: backend.name.clone(),
                changed,
            });
        }

        for pool in backend_state.pools.iter_mut() {
            match reports.get(&pool.name) {
                Some(report) => {
                    let effective = capabilities.merged(&report.capabilities);
                    let changed = pool.capabilities.changes(&effective);
                    if !changed.is_empty() {
                        info!(
                            "Pool {} capabilities changed: {:?}",
                            pool.qualified_name(),
                            changed
                        );
                        events.push(RegistryEvent::PoolCapabilitiesChanged {
                            backend: backend.name.clone(),
                            pool: pool.name.clone(),
                            changed,
                        });
                    }
                    if pool.capacity != report.capacity {
                        debug!(
                            "Pool {} free {} -> {} (total {})",
                            pool.qualified_name(),
                            pool.capacity.free,
                            report.capacity.free,
                            report.capacity.total
                        );
                        events.push(RegistryEvent::PoolCapacityChanged {
                            backend: backend.name.clone(),
                            pool: pool.name.clone(),
                            previous_free: pool.capacity.free,
                            free: report.capacity.free,
                            total: report.capacity.total,
                        });
                    }
                    pool.capabilities = effective;
                    pool.capacity = report.capacity;
                    if !pool.capacity.is_consistent() {
                        registry.report_inconsistent(pool);
                    }
                }
                None => {
                    warn!(
                        "Pool {} missing from refresh response; treating as exhausted",
                        pool.qualified_name()
                    );
                    pool.capacity.free = 0;
                    missing.push(pool.name.clone());
                    events.push(RegistryEvent::PoolMissing {
                        backend: backend.name.clone(),
                        pool: pool.name.clone(),
                    });
                }
            }
            free_gauges.push((pool.name.clone(), pool.capacity.free));
        }

        if !backend_state.available {
            events.push(RegistryEvent::BackendAvailabilityChanged {
                backend: backend.name.clone(),
                available: true,
            });
        }
        backend_state.available = true;
        backend_state.capabilities = capabilities;
        backend_state.last_refresh = Some(Utc::now());
    }

    let metrics = registry.metrics();
    metrics.set_backend_available(&backend.name, true);
    for (pool, free) in free_gauges {
        metrics.set_pool_free(&backend.name, &pool, free);
    }
    for event in events {
        registry.emit(event);
    }

    missing
}

/// Mark a backend unavailable, leaving its last known values in place
fn mark_unavailable(registry: &Registry, id: BackendId) {
    let backend = registry.backend_by_id(id);
    let was_available = {
        let mut state = registry.lock();
        let backend_state = state.backend_mut(id);
        std::mem::replace(&mut backend_state.available, false)
    };

    registry.metrics().set_backend_available(&backend.name, false);
    if was_available {
        registry.emit(RegistryEvent::BackendAvailabilityChanged {
            backend: backend.name.clone(),
            available: false,
        });
    }
}

fn panic_error(backend: &str, join_error: JoinError) -> Error {
    let reason = if join_error.is_panic() {
        let payload = join_error.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string())
    } else {
        join_error.to_string()
    };
    error!("Capability refresh task for backend {} panicked: {}", backend, reason);
    Error::RefreshPanicked {
        backend: backend.to_string(),
        reason,
    }
}
