//! The cluster aggregate: Cluster and its owned WorkerNodeGroup rows.
//!
//! A cluster references one datacenter configuration, one cluster network,
//! two machine configs (control-plane and etcd roles), and an environment.
//! It does not own those rows. Worker-node groups are owned by exactly one
//! cluster and are soft-deleted with it.

use super::{ClusterType, RecordMeta};
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// The top-level provisioned Kubernetes cluster aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub meta: RecordMeta,
    pub name: String,
    pub namespace: String,
    pub platform_version: String,
    pub kubernetes_version: String,
    pub cluster_type: ClusterType,
    pub datacenter_config_id: i64,
    pub cluster_network_id: i64,
    pub control_plane_config_id: i64,
    pub etcd_config_id: i64,
    pub environment_id: i64,
}

/// Creation/update input for [`Cluster`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSpec {
    pub name: String,
    pub namespace: String,
    pub platform_version: String,
    pub kubernetes_version: String,
    pub cluster_type: ClusterType,
    pub datacenter_config_id: i64,
    pub cluster_network_id: i64,
    pub control_plane_config_id: i64,
    pub etcd_config_id: i64,
    pub environment_id: i64,
}

impl ClusterSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Validation(
                "cluster name must not be empty".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(StoreError::Validation(
                "cluster namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_entity(self, meta: RecordMeta) -> Cluster {
        Cluster {
            meta,
            name: self.name,
            namespace: self.namespace,
            platform_version: self.platform_version,
            kubernetes_version: self.kubernetes_version,
            cluster_type: self.cluster_type,
            datacenter_config_id: self.datacenter_config_id,
            cluster_network_id: self.cluster_network_id,
            control_plane_config_id: self.control_plane_config_id,
            etcd_config_id: self.etcd_config_id,
            environment_id: self.environment_id,
        }
    }
}

/// A named pool of worker machines within a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNodeGroup {
    pub meta: RecordMeta,
    pub cluster_id: i64,
    pub name: String,
    pub count: i64,
    pub machine_config_id: i64,
}

/// Creation/update input for [`WorkerNodeGroup`].
///
/// The referenced machine config must carry the worker role; the store
/// checks that against the live row at write time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNodeGroupSpec {
    pub name: String,
    pub count: i64,
    pub machine_config_id: i64,
}

impl WorkerNodeGroupSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Validation(
                "worker node group name must not be empty".to_string(),
            ));
        }
        if self.count < 0 {
            return Err(StoreError::Validation(format!(
                "worker node group count must not be negative, got {}",
                self.count
            )));
        }
        Ok(())
    }

    pub fn into_entity(self, meta: RecordMeta, cluster_id: i64) -> WorkerNodeGroup {
        WorkerNodeGroup {
            meta,
            cluster_id,
            name: self.name,
            count: self.count,
            machine_config_id: self.machine_config_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_node_group_allows_zero_count() {
        let spec = WorkerNodeGroupSpec {
            name: "md-0".to_string(),
            count: 0,
            machine_config_id: 1,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn worker_node_group_rejects_negative_count() {
        let spec = WorkerNodeGroupSpec {
            name: "md-0".to_string(),
            count: -1,
            machine_config_id: 1,
        };
        assert!(matches!(spec.validate(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn cluster_spec_requires_name_and_namespace() {
        let spec = ClusterSpec {
            name: String::new(),
            namespace: "default".to_string(),
            platform_version: "v0.19.0".to_string(),
            kubernetes_version: "1.31".to_string(),
            cluster_type: ClusterType::Management,
            datacenter_config_id: 1,
            cluster_network_id: 1,
            control_plane_config_id: 1,
            etcd_config_id: 1,
            environment_id: 1,
        };
        assert!(matches!(spec.validate(), Err(StoreError::Validation(_))));
    }
}
