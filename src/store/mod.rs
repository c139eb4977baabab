//! Storage backends for the Anchorage configuration model.
//!
//! Backend-agnostic storage layer with:
//! - Store-assigned integer surrogate ids
//! - Soft-delete lifecycle on every primary entity
//! - Referential-integrity checks on every write (restrict on shared
//!   configuration rows, cascade on owned rows)
//! - `Store` trait implementations for SQLite and memory
//!
//! All methods are async for compatibility with network-based backends.
//! Multi-row operations (cluster create, cluster delete cascade, tag
//! attach) are atomic: either all writes apply or none do, even under
//! concurrent callers.

mod memory;
mod sqlite;
#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{
    ArgoCdApplication, ArgoCdApplicationSpec, Cluster, ClusterNetwork, ClusterNetworkSpec,
    ClusterSpec, DatacenterConfiguration, DatacenterConfigurationSpec, Environment, MachineConfig,
    MachineConfigSpec, Tag, TagSpec, WorkerNodeGroup, WorkerNodeGroupSpec,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Backend-agnostic storage interface for the configuration model.
///
/// Object-safe; usable as `Arc<dyn Store>`. Reads resolve only live rows:
/// a soft-deleted id reports `NotFound` like an absent one. Writes validate
/// at the operation boundary and never partially apply.
#[async_trait]
pub trait Store: Send + Sync {
    // === Datacenter configurations ===

    /// Validate and persist a new datacenter configuration
    async fn create_datacenter_configuration(
        &self,
        spec: DatacenterConfigurationSpec,
    ) -> Result<DatacenterConfiguration>;

    /// Get a live datacenter configuration by id
    async fn get_datacenter_configuration(&self, id: i64) -> Result<DatacenterConfiguration>;

    /// Re-validate and replace the fields of a live datacenter configuration
    async fn update_datacenter_configuration(
        &self,
        id: i64,
        spec: DatacenterConfigurationSpec,
    ) -> Result<DatacenterConfiguration>;

    /// Soft-delete; fails with `Conflict` while a live cluster references it
    async fn delete_datacenter_configuration(&self, id: i64) -> Result<()>;

    /// List live datacenter configurations
    async fn list_datacenter_configurations(&self) -> Result<Vec<DatacenterConfiguration>>;

    // === Cluster networks ===

    async fn create_cluster_network(&self, spec: ClusterNetworkSpec) -> Result<ClusterNetwork>;

    async fn get_cluster_network(&self, id: i64) -> Result<ClusterNetwork>;

    async fn update_cluster_network(
        &self,
        id: i64,
        spec: ClusterNetworkSpec,
    ) -> Result<ClusterNetwork>;

    /// Soft-delete; fails with `Conflict` while a live cluster references it
    async fn delete_cluster_network(&self, id: i64) -> Result<()>;

    async fn list_cluster_networks(&self) -> Result<Vec<ClusterNetwork>>;

    // === Machine configs ===

    async fn create_machine_config(&self, spec: MachineConfigSpec) -> Result<MachineConfig>;

    async fn get_machine_config(&self, id: i64) -> Result<MachineConfig>;

    async fn update_machine_config(&self, id: i64, spec: MachineConfigSpec)
        -> Result<MachineConfig>;

    /// Soft-delete; fails with `Conflict` while a live cluster or worker
    /// node group references it
    async fn delete_machine_config(&self, id: i64) -> Result<()>;

    async fn list_machine_configs(&self) -> Result<Vec<MachineConfig>>;

    // === Clusters ===

    /// Atomically create a cluster and its worker node groups.
    ///
    /// Verifies the referenced datacenter configuration, cluster network,
    /// control-plane and etcd machine configs, and environment all exist
    /// and are live (`Integrity` otherwise), and that every worker group's
    /// machine config carries the worker role (`Validation` otherwise).
    /// On any failure no rows are written.
    async fn create_cluster(
        &self,
        spec: ClusterSpec,
        worker_groups: Vec<WorkerNodeGroupSpec>,
    ) -> Result<Cluster>;

    async fn get_cluster(&self, id: i64) -> Result<Cluster>;

    /// Replace scalar fields and swap reference targets, subject to the
    /// same existence and role checks as creation
    async fn update_cluster(&self, id: i64, spec: ClusterSpec) -> Result<Cluster>;

    /// Soft-delete the cluster and cascade to its owned worker node
    /// groups, applications, and cluster-tag joins. Shared configuration
    /// rows are left untouched.
    async fn delete_cluster(&self, id: i64) -> Result<()>;

    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    // === Worker node groups ===

    /// Add a worker node group to a live cluster
    async fn add_worker_node_group(
        &self,
        cluster_id: i64,
        spec: WorkerNodeGroupSpec,
    ) -> Result<WorkerNodeGroup>;

    async fn update_worker_node_group(
        &self,
        id: i64,
        spec: WorkerNodeGroupSpec,
    ) -> Result<WorkerNodeGroup>;

    async fn delete_worker_node_group(&self, id: i64) -> Result<()>;

    /// List a cluster's live worker node groups
    async fn list_worker_node_groups(&self, cluster_id: i64) -> Result<Vec<WorkerNodeGroup>>;

    // === Applications ===

    /// Create an application bound to a live cluster.
    ///
    /// (name, namespace) must be unique among the cluster's live
    /// applications; fails with `Conflict` otherwise.
    async fn create_application(&self, spec: ArgoCdApplicationSpec) -> Result<ArgoCdApplication>;

    async fn get_application(&self, id: i64) -> Result<ArgoCdApplication>;

    async fn update_application(
        &self,
        id: i64,
        spec: ArgoCdApplicationSpec,
    ) -> Result<ArgoCdApplication>;

    /// Soft-delete the application and its tag joins
    async fn delete_application(&self, id: i64) -> Result<()>;

    /// List a cluster's live applications
    async fn list_applications(&self, cluster_id: i64) -> Result<Vec<ArgoCdApplication>>;

    // === Tags ===

    /// Create a tag; the (key, value) pair must be unique among live tags
    async fn create_tag(&self, spec: TagSpec) -> Result<Tag>;

    async fn get_tag(&self, id: i64) -> Result<Tag>;

    /// Soft-delete; fails with `Conflict` while attached to any live
    /// cluster or application
    async fn delete_tag(&self, id: i64) -> Result<()>;

    async fn list_tags(&self) -> Result<Vec<Tag>>;

    /// Attach a tag to a cluster. Both endpoints must be live. Idempotent:
    /// attaching an already-attached tag is a no-op.
    async fn attach_cluster_tag(&self, cluster_id: i64, tag_id: i64) -> Result<()>;

    /// Detach a tag from a cluster; a missing association is a no-op
    async fn detach_cluster_tag(&self, cluster_id: i64, tag_id: i64) -> Result<()>;

    /// A cluster's attached tags in attach (insertion) order
    async fn list_cluster_tags(&self, cluster_id: i64) -> Result<Vec<Tag>>;

    /// Attach a tag to an application. Both endpoints must be live.
    /// Idempotent like [`Store::attach_cluster_tag`].
    async fn attach_application_tag(&self, application_id: i64, tag_id: i64) -> Result<()>;

    /// Detach a tag from an application; a missing association is a no-op
    async fn detach_application_tag(&self, application_id: i64, tag_id: i64) -> Result<()>;

    /// An application's attached tags in attach (insertion) order
    async fn list_application_tags(&self, application_id: i64) -> Result<Vec<Tag>>;

    // === Environments ===

    /// Register an environment by name.
    ///
    /// Fails with `Validation` for a name outside DEV/QA/UAT/PROD and with
    /// `Conflict` when the name is already registered.
    async fn create_environment(&self, name: &str) -> Result<Environment>;

    async fn get_environment(&self, id: i64) -> Result<Environment>;

    async fn get_environment_by_name(&self, name: &str) -> Result<Environment>;

    /// Soft-delete; fails with `Conflict` while a live cluster references it
    async fn delete_environment(&self, id: i64) -> Result<()>;

    async fn list_environments(&self) -> Result<Vec<Environment>>;
}

/// Storage configuration
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// In-memory storage (for testing and development)
    #[default]
    Memory,

    /// SQLite database file
    Sqlite { path: String },
}

/// Create a store from configuration
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Sqlite { path } => {
            let store = SqliteStore::open(path).await?;
            Ok(Arc::new(store))
        }
    }
}
