//! Anchorage configuration model
//!
//! The persisted configuration model for a Kubernetes-cluster provisioning
//! control plane: datacenter targets, network topology, machine shapes,
//! cluster aggregates, worker-node groups, GitOps application bindings, and
//! a tagging/environment taxonomy.
//!
//! This crate owns the relational data model and its referential-integrity
//! contract. Provisioning workflows and reconcilers are external callers:
//! they write validated entities through the [`store::Store`] trait and the
//! store enforces shape and reference constraints at persistence time.

pub mod error;
pub mod model;
pub mod store;

pub use error::{Result, StoreError};
pub use model::{
    ApplicationTag, ArgoCdApplication, ArgoCdApplicationSpec, CapabilityKind, Cluster,
    ClusterNetwork, ClusterNetworkSpec, ClusterSpec, ClusterTag, ClusterType, DatacenterConfiguration,
    DatacenterConfigurationSpec, Environment, EnvironmentName, MachineConfig, MachineConfigSpec,
    MachineRole, RecordMeta, Tag, TagSpec, WorkerNodeGroup, WorkerNodeGroupSpec,
};
pub use store::{create_store, MemoryStore, SqliteStore, Store, StoreConfig};
