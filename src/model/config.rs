//! Shared configuration entities referenced by clusters.
//!
//! These rows are shared: any number of clusters may reference the same
//! datacenter configuration, network, or machine template. Deleting one is
//! restricted while a live cluster or worker-node group still points at it.

use super::{MachineRole, RecordMeta};
use crate::error::{Result, StoreError};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// ============================================================================
// DatacenterConfiguration
// ============================================================================

/// Connection and target parameters for a provisioning datacenter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatacenterConfiguration {
    pub meta: RecordMeta,
    pub name: String,
    pub datacenter: String,
    pub network: String,
    pub server: String,
    pub insecure: bool,
    pub thumbprint: String,
}

/// Creation/update input for [`DatacenterConfiguration`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatacenterConfigurationSpec {
    pub name: String,
    pub datacenter: String,
    pub network: String,
    pub server: String,
    pub insecure: bool,
    pub thumbprint: String,
}

impl DatacenterConfigurationSpec {
    /// TLS thumbprint is required unless the endpoint is explicitly insecure
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Validation(
                "datacenter configuration name must not be empty".to_string(),
            ));
        }
        if !self.insecure && self.thumbprint.is_empty() {
            return Err(StoreError::Validation(
                "TLS thumbprint required unless insecure is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_entity(self, meta: RecordMeta) -> DatacenterConfiguration {
        DatacenterConfiguration {
            meta,
            name: self.name,
            datacenter: self.datacenter,
            network: self.network,
            server: self.server,
            insecure: self.insecure,
            thumbprint: self.thumbprint,
        }
    }
}

// ============================================================================
// ClusterNetwork
// ============================================================================

/// CNI and CIDR allocation settings for a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterNetwork {
    pub meta: RecordMeta,
    pub cni_plugin: String,
    pub pods_cidr_blocks: Vec<String>,
    pub services_cidr_blocks: Vec<String>,
}

/// Creation/update input for [`ClusterNetwork`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterNetworkSpec {
    pub cni_plugin: String,
    pub pods_cidr_blocks: Vec<String>,
    pub services_cidr_blocks: Vec<String>,
}

impl ClusterNetworkSpec {
    /// All CIDR blocks must parse, and no two blocks in the network may
    /// overlap (pods and services draw from disjoint ranges).
    pub fn validate(&self) -> Result<()> {
        if self.cni_plugin.is_empty() {
            return Err(StoreError::Validation(
                "CNI plugin name must not be empty".to_string(),
            ));
        }

        let mut parsed: Vec<(IpNetwork, &str)> = Vec::new();
        for block in self.pods_cidr_blocks.iter().chain(&self.services_cidr_blocks) {
            let net: IpNetwork = block.parse().map_err(|e| {
                StoreError::Validation(format!("invalid CIDR block {}: {}", block, e))
            })?;
            parsed.push((net, block));
        }

        for (i, (a, a_str)) in parsed.iter().enumerate() {
            for (b, b_str) in &parsed[i + 1..] {
                if networks_overlap(a, b) {
                    return Err(StoreError::Validation(format!(
                        "CIDR blocks overlap: {} and {}",
                        a_str, b_str
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn into_entity(self, meta: RecordMeta) -> ClusterNetwork {
        ClusterNetwork {
            meta,
            cni_plugin: self.cni_plugin,
            pods_cidr_blocks: self.pods_cidr_blocks,
            services_cidr_blocks: self.services_cidr_blocks,
        }
    }
}

/// Two networks of the same family overlap when either contains the
/// other's base address.
fn networks_overlap(a: &IpNetwork, b: &IpNetwork) -> bool {
    match (a, b) {
        (IpNetwork::V4(a), IpNetwork::V4(b)) => {
            a.contains(b.network()) || b.contains(a.network())
        }
        (IpNetwork::V6(a), IpNetwork::V6(b)) => {
            a.contains(b.network()) || b.contains(a.network())
        }
        _ => false,
    }
}

// ============================================================================
// MachineConfig
// ============================================================================

/// A machine template (compute/storage shape) tagged with a role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    pub meta: RecordMeta,
    pub name: String,
    pub annotations: Vec<String>,
    pub clone_mode: String,
    pub datastore: String,
    pub disk_gib: i64,
    pub folder: String,
    pub memory_mib: i64,
    pub num_cpus: i64,
    pub os_family: String,
    pub resource_pool: String,
    pub template: String,
    pub machine_role: MachineRole,
}

/// Creation/update input for [`MachineConfig`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfigSpec {
    pub name: String,
    pub annotations: Vec<String>,
    pub clone_mode: String,
    pub datastore: String,
    pub disk_gib: i64,
    pub folder: String,
    pub memory_mib: i64,
    pub num_cpus: i64,
    pub os_family: String,
    pub resource_pool: String,
    pub template: String,
    pub machine_role: MachineRole,
}

impl MachineConfigSpec {
    /// Compute and storage shapes must be strictly positive
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Validation(
                "machine config name must not be empty".to_string(),
            ));
        }
        if self.disk_gib <= 0 {
            return Err(StoreError::Validation(format!(
                "disk size must be positive, got {} GiB",
                self.disk_gib
            )));
        }
        if self.memory_mib <= 0 {
            return Err(StoreError::Validation(format!(
                "memory must be positive, got {} MiB",
                self.memory_mib
            )));
        }
        if self.num_cpus <= 0 {
            return Err(StoreError::Validation(format!(
                "CPU count must be positive, got {}",
                self.num_cpus
            )));
        }
        Ok(())
    }

    pub fn into_entity(self, meta: RecordMeta) -> MachineConfig {
        MachineConfig {
            meta,
            name: self.name,
            annotations: self.annotations,
            clone_mode: self.clone_mode,
            datastore: self.datastore,
            disk_gib: self.disk_gib,
            folder: self.folder,
            memory_mib: self.memory_mib,
            num_cpus: self.num_cpus,
            os_family: self.os_family,
            resource_pool: self.resource_pool,
            template: self.template,
            machine_role: self.machine_role,
        }
    }
}
