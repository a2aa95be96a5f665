//! Storage Adapters
//!
//! Resolves each configured backend to the adapter that talks to it.
//! Array-specific clients plug in per product through [`AdapterFactory`];
//! products without a registered constructor fall back to the
//! [`StaticArrayAdapter`].

pub mod static_array;

pub use static_array::*;

use crate::config::BackendConfig;
use crate::domain::ports::{StorageAdapterRef, StorageProduct};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an adapter for one backend configuration
pub type AdapterConstructor =
    Arc<dyn Fn(&BackendConfig) -> Result<StorageAdapterRef> + Send + Sync>;

/// Factory for creating storage adapters
#[derive(Clone, Default)]
pub struct AdapterFactory {
    constructors: HashMap<StorageProduct, AdapterConstructor>,
    instances: HashMap<String, StorageAdapterRef>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `constructor` for every backend of `product`
    pub fn with_constructor<F>(mut self, product: StorageProduct, constructor: F) -> Self
    where
        F: Fn(&BackendConfig) -> Result<StorageAdapterRef> + Send + Sync + 'static,
    {
        self.constructors.insert(product, Arc::new(constructor));
        self
    }

    /// Use an already-built adapter for the named backend
    pub fn with_instance(mut self, backend: impl Into<String>, adapter: StorageAdapterRef) -> Self {
        self.instances.insert(backend.into(), adapter);
        self
    }

    /// Resolve the adapter for a backend
    pub fn create(&self, config: &BackendConfig) -> Result<StorageAdapterRef> {
        if let Some(adapter) = self.instances.get(&config.name) {
            return Ok(adapter.clone());
        }
        match self.constructors.get(&config.product) {
            Some(constructor) => constructor(config),
            None => Ok(Arc::new(StaticArrayAdapter::from_config(config)?)),
        }
    }
}

impl std::fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("constructors", &self.constructors.keys().collect::<Vec<_>>())
            .field("instances", &self.instances.keys().collect::<Vec<_>>())
            .finish()
    }
}
