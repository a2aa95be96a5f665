//! Volume Constraints
//!
//! Typed form of the constraint bag a provisioning caller attaches to each
//! request. Parsing rejects keys the scheduler does not recognize instead of
//! silently ignoring them.

use crate::domain::ports::{StorageKind, Topology};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// =============================================================================
// Constraint Keys
// =============================================================================

/// Recognized constraint keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKey {
    Backend,
    Pool,
    VolumeType,
    AllocType,
    Qos,
    HyperMetro,
    Replication,
    ApplicationType,
    Topology,
}

impl ConstraintKey {
    pub const ALL: [ConstraintKey; 9] = [
        ConstraintKey::Backend,
        ConstraintKey::Pool,
        ConstraintKey::VolumeType,
        ConstraintKey::AllocType,
        ConstraintKey::Qos,
        ConstraintKey::HyperMetro,
        ConstraintKey::Replication,
        ConstraintKey::ApplicationType,
        ConstraintKey::Topology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKey::Backend => "backend",
            ConstraintKey::Pool => "pool",
            ConstraintKey::VolumeType => "volumeType",
            ConstraintKey::AllocType => "allocType",
            ConstraintKey::Qos => "qos",
            ConstraintKey::HyperMetro => "hyperMetro",
            ConstraintKey::Replication => "replication",
            ConstraintKey::ApplicationType => "applicationType",
            ConstraintKey::Topology => "topology",
        }
    }
}

impl std::fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConstraintKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConstraintKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| Error::UnknownConstraint { key: s.to_string() })
    }
}

// =============================================================================
// Allocation Type
// =============================================================================

/// Thin or thick provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocType {
    Thin,
    Thick,
}

impl std::fmt::Display for AllocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocType::Thin => write!(f, "thin"),
            AllocType::Thick => write!(f, "thick"),
        }
    }
}

// =============================================================================
// Topology Requirement
// =============================================================================

/// Accessibility requirement of a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TopologyRequirement {
    /// The volume must be reachable from at least one of these
    #[serde(default)]
    pub requisite: Vec<Topology>,
    /// Preferred placements, highest priority first
    #[serde(default)]
    pub preferred: Vec<Topology>,
}

impl TopologyRequirement {
    pub fn is_empty(&self) -> bool {
        self.requisite.is_empty() && self.preferred.is_empty()
    }
}

// =============================================================================
// Volume Constraints
// =============================================================================

/// Constraints attached to one provisioning request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeConstraints {
    /// Pin to a backend by name
    pub backend: Option<String>,
    /// Pin to a pool by name
    pub pool: Option<String>,
    /// Block or file; block when unset
    pub volume_type: Option<StorageKind>,
    pub alloc_type: Option<AllocType>,
    /// QoS policy; any value requires QoS support
    pub qos: Option<String>,
    pub hyper_metro: bool,
    pub replication: bool,
    /// Application type; any value requires application-type support
    pub application_type: Option<String>,
    pub topology: TopologyRequirement,
}

impl VolumeConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a string-keyed constraint bag.
    ///
    /// Empty values mean "unconstrained". Topology is carried separately
    /// and attached with [`VolumeConstraints::with_topology`].
    pub fn from_parameters(parameters: &BTreeMap<String, String>) -> Result<Self> {
        let mut constraints = Self::default();

        for (key, value) in parameters {
            let parsed: ConstraintKey = key.parse()?;
            let value = value.trim();
            let invalid = || Error::InvalidConstraint {
                key: key.clone(),
                value: value.to_string(),
            };
            let non_empty = || (!value.is_empty()).then(|| value.to_string());

            match parsed {
                ConstraintKey::Backend => constraints.backend = non_empty(),
                ConstraintKey::Pool => constraints.pool = non_empty(),
                ConstraintKey::VolumeType => {
                    constraints.volume_type = match value {
                        "" => None,
                        "block" | "lun" => Some(StorageKind::Block),
                        "file" | "fs" => Some(StorageKind::File),
                        "object" | "bucket" => Some(StorageKind::Object),
                        _ => return Err(invalid()),
                    }
                }
                ConstraintKey::AllocType => {
                    constraints.alloc_type = match value {
                        "" => None,
                        "thin" => Some(AllocType::Thin),
                        "thick" => Some(AllocType::Thick),
                        _ => return Err(invalid()),
                    }
                }
                ConstraintKey::Qos => constraints.qos = non_empty(),
                ConstraintKey::HyperMetro => {
                    constraints.hyper_metro = parse_flag(value).ok_or_else(invalid)?
                }
                ConstraintKey::Replication => {
                    constraints.replication = parse_flag(value).ok_or_else(invalid)?
                }
                ConstraintKey::ApplicationType => constraints.application_type = non_empty(),
                ConstraintKey::Topology => {
                    if !value.is_empty() {
                        constraints.topology = serde_json::from_str(value).map_err(|_| invalid())?;
                    }
                }
            }
        }

        Ok(constraints)
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn with_volume_type(mut self, kind: StorageKind) -> Self {
        self.volume_type = Some(kind);
        self
    }

    pub fn with_alloc_type(mut self, alloc_type: AllocType) -> Self {
        self.alloc_type = Some(alloc_type);
        self
    }

    pub fn with_qos(mut self, qos: impl Into<String>) -> Self {
        self.qos = Some(qos.into());
        self
    }

    pub fn with_hyper_metro(mut self) -> Self {
        self.hyper_metro = true;
        self
    }

    pub fn with_replication(mut self) -> Self {
        self.replication = true;
        self
    }

    pub fn with_application_type(mut self, application_type: impl Into<String>) -> Self {
        self.application_type = Some(application_type.into());
        self
    }

    pub fn with_topology(mut self, topology: TopologyRequirement) -> Self {
        self.topology = topology;
        self
    }

    /// Requested volume family
    pub fn volume_kind(&self) -> StorageKind {
        self.volume_type.unwrap_or(StorageKind::Block)
    }

    /// Raw value of a constraint as the caller would have written it
    pub fn value(&self, key: ConstraintKey) -> String {
        match key {
            ConstraintKey::Backend => self.backend.clone().unwrap_or_default(),
            ConstraintKey::Pool => self.pool.clone().unwrap_or_default(),
            ConstraintKey::VolumeType => {
                self.volume_type.map(|k| k.to_string()).unwrap_or_default()
            }
            ConstraintKey::AllocType => self.alloc_type.map(|a| a.to_string()).unwrap_or_default(),
            ConstraintKey::Qos => self.qos.clone().unwrap_or_default(),
            ConstraintKey::HyperMetro => self.hyper_metro.to_string(),
            ConstraintKey::Replication => self.replication.to_string(),
            ConstraintKey::ApplicationType => self.application_type.clone().unwrap_or_default(),
            ConstraintKey::Topology => {
                serde_json::to_string(&self.topology).unwrap_or_default()
            }
        }
    }

    /// A volume is either mirrored or replicated, never both
    pub fn check_exclusive(&self) -> Result<()> {
        if self.hyper_metro && self.replication {
            return Err(Error::MutuallyExclusiveConstraints {
                first: ConstraintKey::HyperMetro.to_string(),
                second: ConstraintKey::Replication.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "false" => Some(false),
        "true" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_full_bag() {
        let constraints = VolumeConstraints::from_parameters(&params(&[
            ("backend", "array-a"),
            ("pool", ""),
            ("volumeType", "file"),
            ("allocType", "thick"),
            ("qos", r#"{"IOTYPE":2,"MAXIOPS":1000}"#),
            ("hyperMetro", "true"),
            ("replication", "false"),
            ("applicationType", "Oracle_OLAP"),
        ]))
        .unwrap();

        assert_eq!(constraints.backend.as_deref(), Some("array-a"));
        assert_eq!(constraints.pool, None);
        assert_eq!(constraints.volume_kind(), StorageKind::File);
        assert_eq!(constraints.alloc_type, Some(AllocType::Thick));
        assert!(constraints.qos.is_some());
        assert!(constraints.hyper_metro);
        assert!(!constraints.replication);
        assert_eq!(constraints.value(ConstraintKey::AllocType), "thick");
    }

    #[test]
    fn test_object_volume_type() {
        let constraints =
            VolumeConstraints::from_parameters(&params(&[("volumeType", "object")])).unwrap();
        assert_eq!(constraints.volume_kind(), StorageKind::Object);
        assert_eq!(constraints.value(ConstraintKey::VolumeType), "object");
    }

    #[test]
    fn test_defaults() {
        let constraints = VolumeConstraints::from_parameters(&BTreeMap::new()).unwrap();
        assert_eq!(constraints, VolumeConstraints::default());
        assert_eq!(constraints.volume_kind(), StorageKind::Block);
        assert_eq!(constraints.value(ConstraintKey::Backend), "");
    }

    #[test]
    fn test_unknown_and_invalid() {
        assert_matches!(
            VolumeConstraints::from_parameters(&params(&[("colour", "red")])),
            Err(Error::UnknownConstraint { key }) if key == "colour"
        );
        assert_matches!(
            VolumeConstraints::from_parameters(&params(&[("allocType", "fat")])),
            Err(Error::InvalidConstraint { .. })
        );
        assert_matches!(
            VolumeConstraints::from_parameters(&params(&[("hyperMetro", "yes")])),
            Err(Error::InvalidConstraint { .. })
        );
    }

    #[test]
    fn test_topology_parameter() {
        let constraints = VolumeConstraints::from_parameters(&params(&[(
            "topology",
            r#"{"requisite":[{"zone":"a"}],"preferred":[{"zone":"a"}]}"#,
        )]))
        .unwrap();
        assert_eq!(constraints.topology.requisite.len(), 1);
        assert_eq!(constraints.topology.preferred[0]["zone"], "a");
    }

    #[test]
    fn test_mutual_exclusion() {
        let both = VolumeConstraints::new().with_hyper_metro().with_replication();
        assert_matches!(
            both.check_exclusive(),
            Err(Error::MutuallyExclusiveConstraints { .. })
        );
        assert!(VolumeConstraints::new().with_replication().check_exclusive().is_ok());
    }

    #[test]
    fn test_key_round_trip() {
        for key in ConstraintKey::ALL {
            assert_eq!(key.as_str().parse::<ConstraintKey>().unwrap(), key);
        }
    }
}
