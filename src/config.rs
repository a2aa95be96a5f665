//! Fleet Configuration
//!
//! Typed description of every backend the scheduler manages, loaded once at
//! startup from a YAML file.

use crate::domain::ports::{StorageKind, StorageProduct, Topology};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

// =============================================================================
// Pairing
// =============================================================================

/// Mirror or replication relationship as declared by one side.
///
/// Two backends pair when both declare the relationship, every declared
/// partner name points at the other side, and declared domains are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairingConfig {
    /// Shared domain / pair identifier
    #[serde(default)]
    pub domain: Option<String>,
    /// Name of the partner backend
    #[serde(default)]
    pub partner: Option<String>,
}

impl PairingConfig {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            partner: None,
        }
    }

    pub fn partner(partner: impl Into<String>) -> Self {
        Self {
            domain: None,
            partner: Some(partner.into()),
        }
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Configuration for one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackendConfig {
    /// Globally unique backend name
    pub name: String,
    /// Storage product, which also fixes the storage kind
    pub product: StorageProduct,
    /// Configured pool names, in order
    #[serde(default)]
    pub pools: Vec<String>,
    /// Adapter-specific parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Synchronous mirror (HyperMetro) relationship
    #[serde(default)]
    pub mirror: Option<PairingConfig>,
    /// Asynchronous replication relationship
    #[serde(default)]
    pub replica: Option<PairingConfig>,
    /// Label sets this backend can serve; empty means unrestricted
    #[serde(default)]
    pub supported_topologies: Vec<Topology>,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, product: StorageProduct) -> Self {
        Self {
            name: name.into(),
            product,
            pools: Vec::new(),
            parameters: BTreeMap::new(),
            mirror: None,
            replica: None,
            supported_topologies: Vec::new(),
        }
    }

    pub fn with_pools<I, S>(mut self, pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pools = pools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_mirror(mut self, mirror: PairingConfig) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_replica(mut self, replica: PairingConfig) -> Self {
        self.replica = Some(replica);
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.supported_topologies.push(topology);
        self
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.product.storage_kind()
    }

    /// Names of the pools this backend registers.
    ///
    /// Products without sub-pools get one pool named after the backend.
    pub fn pool_names(&self) -> Vec<String> {
        if self.product.has_sub_pools() {
            self.pools.clone()
        } else {
            vec![self.name.clone()]
        }
    }

    /// Validate this entry in isolation
    pub fn validate(&self) -> Result<()> {
        validate_backend_name(&self.name)?;

        if self.product.has_sub_pools() {
            if self.pools.is_empty() {
                return Err(Error::Configuration(format!(
                    "backend {} ({}) must configure at least one pool",
                    self.name, self.product
                )));
            }
            let mut seen = HashSet::new();
            for pool in &self.pools {
                if pool.trim().is_empty() {
                    return Err(Error::Configuration(format!(
                        "backend {} has an empty pool name",
                        self.name
                    )));
                }
                if !seen.insert(pool.as_str()) {
                    return Err(Error::Configuration(format!(
                        "backend {} lists pool {} twice",
                        self.name, pool
                    )));
                }
            }
        } else if !self.pools.is_empty() {
            return Err(Error::Configuration(format!(
                "backend {} ({}) has no sub-pools; remove the pools list",
                self.name, self.product
            )));
        }

        for (relation, pairing) in [("mirror", &self.mirror), ("replica", &self.replica)] {
            if let Some(pairing) = pairing {
                if pairing.domain.is_none() && pairing.partner.is_none() {
                    return Err(Error::Configuration(format!(
                        "backend {}: {} needs a domain or a partner",
                        self.name, relation
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Backend names are restricted to `^[\w-]+$` (ASCII word characters and '-')
pub fn validate_backend_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidBackendName {
            name: name.to_string(),
        })
    }
}

// =============================================================================
// Fleet Configuration
// =============================================================================

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FleetConfig {
    pub backends: Vec<BackendConfig>,
}

impl FleetConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: FleetConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::Configuration("no backends configured".into()));
        }
        let mut names = HashSet::new();
        for backend in &self.backends {
            backend.validate()?;
            if !names.insert(backend.name.as_str()) {
                return Err(Error::DuplicateBackend {
                    name: backend.name.clone(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Capacity Parsing
// =============================================================================

/// Parse capacity string (e.g., "100Gi", "1Ti") to bytes
pub fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity string".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1 << 10,
        "M" | "MB" | "MI" | "MIB" => 1 << 20,
        "G" | "GB" | "GI" | "GIB" => 1 << 30,
        "T" | "TB" | "TI" | "TIB" => 1 << 40,
        "P" | "PB" | "PI" | "PIB" => 1 << 50,
        _ => {
            return Err(Error::CapacityParse(format!(
                "unknown unit: {}",
                unit_str
            )))
        }
    };

    Ok((num * multiplier as f64) as u64)
}
