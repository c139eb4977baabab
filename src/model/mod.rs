//! Entity types for the Anchorage configuration model.
//!
//! Every primary entity composes [`RecordMeta`]: a store-assigned surrogate
//! id plus the soft-delete lifecycle marker. Creation inputs are `*Spec`
//! structs without identity or timestamps; the store assigns those on create.
//! Enumerated columns are real Rust enums persisted as their canonical
//! strings, so an out-of-range value is rejected before it reaches a backend.

mod application;
mod cluster;
mod config;
mod tag;

pub use application::{ArgoCdApplication, ArgoCdApplicationSpec};
pub use cluster::{Cluster, ClusterSpec, WorkerNodeGroup, WorkerNodeGroupSpec};
pub use config::{
    ClusterNetwork, ClusterNetworkSpec, DatacenterConfiguration, DatacenterConfigurationSpec,
    MachineConfig, MachineConfigSpec,
};
pub use tag::{ApplicationTag, ClusterTag, Environment, Tag, TagSpec};

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Base record
// ============================================================================

/// Identity and lifecycle fields shared by every primary entity.
///
/// The surrogate id is assigned by the store on create and never changes.
/// A non-null `deleted_at` marks the row logically absent from normal
/// queries without physically removing it, preserving audit lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMeta {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    /// Fresh metadata for a newly created row
    pub fn new(id: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Bump `updated_at` after an in-place update
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Set the soft-delete marker
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
        self.updated_at = at;
    }
}

// ============================================================================
// Enumerated columns
// ============================================================================

/// Role a machine template plays in a cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MachineRole {
    #[serde(rename = "control-plane")]
    ControlPlane,
    #[serde(rename = "etcd")]
    Etcd,
    #[serde(rename = "worker")]
    Worker,
}

impl MachineRole {
    /// Canonical string stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineRole::ControlPlane => "control-plane",
            MachineRole::Etcd => "etcd",
            MachineRole::Worker => "worker",
        }
    }
}

impl FromStr for MachineRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control-plane" => Ok(MachineRole::ControlPlane),
            "etcd" => Ok(MachineRole::Etcd),
            "worker" => Ok(MachineRole::Worker),
            other => Err(StoreError::Validation(format!(
                "unknown machine role: {}",
                other
            ))),
        }
    }
}

/// Whether a cluster manages other clusters or runs workloads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClusterType {
    Management,
    Worker,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Management => "Management",
            ClusterType::Worker => "Worker",
        }
    }
}

impl FromStr for ClusterType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Management" => Ok(ClusterType::Management),
            "Worker" => Ok(ClusterType::Worker),
            other => Err(StoreError::Validation(format!(
                "unknown cluster type: {}",
                other
            ))),
        }
    }
}

/// Deployment-stage classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnvironmentName {
    #[serde(rename = "DEV")]
    Dev,
    #[serde(rename = "QA")]
    Qa,
    #[serde(rename = "UAT")]
    Uat,
    #[serde(rename = "PROD")]
    Prod,
}

impl EnvironmentName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentName::Dev => "DEV",
            EnvironmentName::Qa => "QA",
            EnvironmentName::Uat => "UAT",
            EnvironmentName::Prod => "PROD",
        }
    }
}

impl FromStr for EnvironmentName {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEV" => Ok(EnvironmentName::Dev),
            "QA" => Ok(EnvironmentName::Qa),
            "UAT" => Ok(EnvironmentName::Uat),
            "PROD" => Ok(EnvironmentName::Prod),
            other => Err(StoreError::Validation(format!(
                "unknown environment name: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Extension points
// ============================================================================

/// Future capability extension points.
///
/// These carry no behavior today; a concrete contract will be defined per
/// capability before any of them grows operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CapabilityKind {
    HarborRegistry,
    MinIo,
    ArgoCd,
    ApplicationTier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_role_round_trip() {
        for role in [MachineRole::ControlPlane, MachineRole::Etcd, MachineRole::Worker] {
            assert_eq!(role.as_str().parse::<MachineRole>().unwrap(), role);
        }
    }

    #[test]
    fn machine_role_rejects_unknown() {
        let err = "gpu".parse::<MachineRole>().unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn environment_name_rejects_staging() {
        let err = "STAGING".parse::<EnvironmentName>().unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn cluster_type_round_trip() {
        assert_eq!("Management".parse::<ClusterType>().unwrap(), ClusterType::Management);
        assert_eq!("Worker".parse::<ClusterType>().unwrap(), ClusterType::Worker);
        assert!("Hybrid".parse::<ClusterType>().is_err());
    }

    #[test]
    fn record_meta_lifecycle() {
        let mut meta = RecordMeta::new(7);
        assert_eq!(meta.id, 7);
        assert!(!meta.is_deleted());

        let now = Utc::now();
        meta.mark_deleted(now);
        assert!(meta.is_deleted());
        assert_eq!(meta.updated_at, now);
    }
}
