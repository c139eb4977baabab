//! In-memory storage backend.
//!
//! Simple storage for testing and development. A single RwLock guards the
//! whole state, so multi-row operations validate and mutate under one write
//! lock and are trivially all-or-nothing.

use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{
    ApplicationTag, ArgoCdApplication, ArgoCdApplicationSpec, Cluster, ClusterNetwork,
    ClusterNetworkSpec, ClusterSpec, ClusterTag, DatacenterConfiguration,
    DatacenterConfigurationSpec, Environment, EnvironmentName, MachineConfig, MachineConfigSpec,
    MachineRole, RecordMeta, Tag, TagSpec, WorkerNodeGroup, WorkerNodeGroupSpec,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    next_id: i64,
    datacenter_configurations: HashMap<i64, DatacenterConfiguration>,
    cluster_networks: HashMap<i64, ClusterNetwork>,
    machine_configs: HashMap<i64, MachineConfig>,
    clusters: HashMap<i64, Cluster>,
    worker_node_groups: HashMap<i64, WorkerNodeGroup>,
    applications: HashMap<i64, ArgoCdApplication>,
    tags: HashMap<i64, Tag>,
    environments: HashMap<i64, Environment>,
    cluster_tags: Vec<ClusterTag>,
    application_tags: Vec<ApplicationTag>,
}

impl Inner {
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_cluster(&self, id: i64) -> Option<&Cluster> {
        self.clusters.get(&id).filter(|c| !c.meta.is_deleted())
    }

    fn live_machine_config(&self, id: i64) -> Option<&MachineConfig> {
        self.machine_configs.get(&id).filter(|m| !m.meta.is_deleted())
    }

    fn live_tag(&self, id: i64) -> Option<&Tag> {
        self.tags.get(&id).filter(|t| !t.meta.is_deleted())
    }

    fn live_application(&self, id: i64) -> Option<&ArgoCdApplication> {
        self.applications.get(&id).filter(|a| !a.meta.is_deleted())
    }

    /// All five reference targets of a cluster spec must be live
    fn check_cluster_references(&self, spec: &ClusterSpec) -> Result<()> {
        if self
            .datacenter_configurations
            .get(&spec.datacenter_config_id)
            .filter(|d| !d.meta.is_deleted())
            .is_none()
        {
            return Err(StoreError::Integrity(format!(
                "datacenter configuration {} does not exist or is deleted",
                spec.datacenter_config_id
            )));
        }
        if self
            .cluster_networks
            .get(&spec.cluster_network_id)
            .filter(|n| !n.meta.is_deleted())
            .is_none()
        {
            return Err(StoreError::Integrity(format!(
                "cluster network {} does not exist or is deleted",
                spec.cluster_network_id
            )));
        }
        for (label, id) in [
            ("control-plane", spec.control_plane_config_id),
            ("etcd", spec.etcd_config_id),
        ] {
            if self.live_machine_config(id).is_none() {
                return Err(StoreError::Integrity(format!(
                    "{} machine config {} does not exist or is deleted",
                    label, id
                )));
            }
        }
        if self
            .environments
            .get(&spec.environment_id)
            .filter(|e| !e.meta.is_deleted())
            .is_none()
        {
            return Err(StoreError::Integrity(format!(
                "environment {} does not exist or is deleted",
                spec.environment_id
            )));
        }
        Ok(())
    }

    /// The machine config backing a worker node group must be live and
    /// carry the worker role
    fn check_worker_machine_config(&self, id: i64) -> Result<()> {
        match self.live_machine_config(id) {
            None => Err(StoreError::Integrity(format!(
                "machine config {} does not exist or is deleted",
                id
            ))),
            Some(config) if config.machine_role != MachineRole::Worker => {
                Err(StoreError::Validation(format!(
                    "machine config {} has role {}, expected worker",
                    id,
                    config.machine_role.as_str()
                )))
            }
            Some(_) => Ok(()),
        }
    }

    /// (name, namespace) uniqueness among a cluster's live applications
    fn check_application_unique(
        &self,
        cluster_id: i64,
        name: &str,
        namespace: &str,
        exclude_id: Option<i64>,
    ) -> Result<()> {
        let taken = self.applications.values().any(|a| {
            !a.meta.is_deleted()
                && a.cluster_id == cluster_id
                && a.name == name
                && a.namespace == namespace
                && Some(a.meta.id) != exclude_id
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "application {}/{} already exists in cluster {}",
                namespace, name, cluster_id
            )));
        }
        Ok(())
    }
}

/// In-memory storage backend implementing the configuration model.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Lock(format!("read lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Lock(format!("write lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // === Datacenter configurations ===

    async fn create_datacenter_configuration(
        &self,
        spec: DatacenterConfigurationSpec,
    ) -> Result<DatacenterConfiguration> {
        spec.validate()?;
        let mut inner = self.write()?;
        let id = inner.alloc_id();
        let entity = spec.into_entity(RecordMeta::new(id));
        inner.datacenter_configurations.insert(id, entity.clone());
        Ok(entity)
    }

    async fn get_datacenter_configuration(&self, id: i64) -> Result<DatacenterConfiguration> {
        let inner = self.read()?;
        inner
            .datacenter_configurations
            .get(&id)
            .filter(|d| !d.meta.is_deleted())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("datacenter configuration {}", id)))
    }

    async fn update_datacenter_configuration(
        &self,
        id: i64,
        spec: DatacenterConfigurationSpec,
    ) -> Result<DatacenterConfiguration> {
        spec.validate()?;
        let mut inner = self.write()?;
        let mut meta = inner
            .datacenter_configurations
            .get(&id)
            .filter(|d| !d.meta.is_deleted())
            .map(|d| d.meta.clone())
            .ok_or_else(|| StoreError::NotFound(format!("datacenter configuration {}", id)))?;
        meta.touch();
        let entity = spec.into_entity(meta);
        inner.datacenter_configurations.insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete_datacenter_configuration(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner
            .datacenter_configurations
            .get(&id)
            .filter(|d| !d.meta.is_deleted())
            .is_none()
        {
            return Err(StoreError::NotFound(format!(
                "datacenter configuration {}",
                id
            )));
        }
        let referenced = inner
            .clusters
            .values()
            .any(|c| !c.meta.is_deleted() && c.datacenter_config_id == id);
        if referenced {
            return Err(StoreError::Conflict(format!(
                "datacenter configuration {} is referenced by a live cluster",
                id
            )));
        }
        let now = Utc::now();
        if let Some(entity) = inner.datacenter_configurations.get_mut(&id) {
            entity.meta.mark_deleted(now);
        }
        Ok(())
    }

    async fn list_datacenter_configurations(&self) -> Result<Vec<DatacenterConfiguration>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .datacenter_configurations
            .values()
            .filter(|d| !d.meta.is_deleted())
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.meta.id);
        Ok(rows)
    }

    // === Cluster networks ===

    async fn create_cluster_network(&self, spec: ClusterNetworkSpec) -> Result<ClusterNetwork> {
        spec.validate()?;
        let mut inner = self.write()?;
        let id = inner.alloc_id();
        let entity = spec.into_entity(RecordMeta::new(id));
        inner.cluster_networks.insert(id, entity.clone());
        Ok(entity)
    }

    async fn get_cluster_network(&self, id: i64) -> Result<ClusterNetwork> {
        let inner = self.read()?;
        inner
            .cluster_networks
            .get(&id)
            .filter(|n| !n.meta.is_deleted())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cluster network {}", id)))
    }

    async fn update_cluster_network(
        &self,
        id: i64,
        spec: ClusterNetworkSpec,
    ) -> Result<ClusterNetwork> {
        spec.validate()?;
        let mut inner = self.write()?;
        let mut meta = inner
            .cluster_networks
            .get(&id)
            .filter(|n| !n.meta.is_deleted())
            .map(|n| n.meta.clone())
            .ok_or_else(|| StoreError::NotFound(format!("cluster network {}", id)))?;
        meta.touch();
        let entity = spec.into_entity(meta);
        inner.cluster_networks.insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete_cluster_network(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner
            .cluster_networks
            .get(&id)
            .filter(|n| !n.meta.is_deleted())
            .is_none()
        {
            return Err(StoreError::NotFound(format!("cluster network {}", id)));
        }
        let referenced = inner
            .clusters
            .values()
            .any(|c| !c.meta.is_deleted() && c.cluster_network_id == id);
        if referenced {
            return Err(StoreError::Conflict(format!(
                "cluster network {} is referenced by a live cluster",
                id
            )));
        }
        let now = Utc::now();
        if let Some(entity) = inner.cluster_networks.get_mut(&id) {
            entity.meta.mark_deleted(now);
        }
        Ok(())
    }

    async fn list_cluster_networks(&self) -> Result<Vec<ClusterNetwork>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .cluster_networks
            .values()
            .filter(|n| !n.meta.is_deleted())
            .cloned()
            .collect();
        rows.sort_by_key(|n| n.meta.id);
        Ok(rows)
    }

    // === Machine configs ===

    async fn create_machine_config(&self, spec: MachineConfigSpec) -> Result<MachineConfig> {
        spec.validate()?;
        let mut inner = self.write()?;
        let id = inner.alloc_id();
        let entity = spec.into_entity(RecordMeta::new(id));
        inner.machine_configs.insert(id, entity.clone());
        Ok(entity)
    }

    async fn get_machine_config(&self, id: i64) -> Result<MachineConfig> {
        let inner = self.read()?;
        inner
            .live_machine_config(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("machine config {}", id)))
    }

    async fn update_machine_config(
        &self,
        id: i64,
        spec: MachineConfigSpec,
    ) -> Result<MachineConfig> {
        spec.validate()?;
        let mut inner = self.write()?;
        let mut meta = inner
            .live_machine_config(id)
            .map(|m| m.meta.clone())
            .ok_or_else(|| StoreError::NotFound(format!("machine config {}", id)))?;
        meta.touch();
        let entity = spec.into_entity(meta);
        inner.machine_configs.insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete_machine_config(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner.live_machine_config(id).is_none() {
            return Err(StoreError::NotFound(format!("machine config {}", id)));
        }
        let referenced_by_cluster = inner.clusters.values().any(|c| {
            !c.meta.is_deleted()
                && (c.control_plane_config_id == id || c.etcd_config_id == id)
        });
        let referenced_by_group = inner
            .worker_node_groups
            .values()
            .any(|g| !g.meta.is_deleted() && g.machine_config_id == id);
        if referenced_by_cluster || referenced_by_group {
            return Err(StoreError::Conflict(format!(
                "machine config {} is referenced by a live cluster or worker node group",
                id
            )));
        }
        let now = Utc::now();
        if let Some(entity) = inner.machine_configs.get_mut(&id) {
            entity.meta.mark_deleted(now);
        }
        Ok(())
    }

    async fn list_machine_configs(&self) -> Result<Vec<MachineConfig>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .machine_configs
            .values()
            .filter(|m| !m.meta.is_deleted())
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.meta.id);
        Ok(rows)
    }

    // === Clusters ===

    async fn create_cluster(
        &self,
        spec: ClusterSpec,
        worker_groups: Vec<WorkerNodeGroupSpec>,
    ) -> Result<Cluster> {
        spec.validate()?;
        for group in &worker_groups {
            group.validate()?;
        }

        let mut inner = self.write()?;
        inner.check_cluster_references(&spec)?;
        for group in &worker_groups {
            inner.check_worker_machine_config(group.machine_config_id)?;
        }

        // All checks passed; now safe to write
        let cluster_id = inner.alloc_id();
        let cluster = spec.into_entity(RecordMeta::new(cluster_id));
        inner.clusters.insert(cluster_id, cluster.clone());
        for group in worker_groups {
            let group_id = inner.alloc_id();
            let entity = group.into_entity(RecordMeta::new(group_id), cluster_id);
            inner.worker_node_groups.insert(group_id, entity);
        }
        Ok(cluster)
    }

    async fn get_cluster(&self, id: i64) -> Result<Cluster> {
        let inner = self.read()?;
        inner
            .live_cluster(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))
    }

    async fn update_cluster(&self, id: i64, spec: ClusterSpec) -> Result<Cluster> {
        spec.validate()?;
        let mut inner = self.write()?;
        let mut meta = inner
            .live_cluster(id)
            .map(|c| c.meta.clone())
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))?;
        inner.check_cluster_references(&spec)?;
        meta.touch();
        let entity = spec.into_entity(meta);
        inner.clusters.insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete_cluster(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner.live_cluster(id).is_none() {
            return Err(StoreError::NotFound(format!("cluster {}", id)));
        }
        let now = Utc::now();
        if let Some(cluster) = inner.clusters.get_mut(&id) {
            cluster.meta.mark_deleted(now);
        }
        // Cascade to owned rows only; shared configuration stays live
        for group in inner.worker_node_groups.values_mut() {
            if group.cluster_id == id && !group.meta.is_deleted() {
                group.meta.mark_deleted(now);
            }
        }
        for app in inner.applications.values_mut() {
            if app.cluster_id == id && !app.meta.is_deleted() {
                app.meta.mark_deleted(now);
            }
        }
        for join in inner.cluster_tags.iter_mut() {
            if join.cluster_id == id && join.deleted_at.is_none() {
                join.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .clusters
            .values()
            .filter(|c| !c.meta.is_deleted())
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.meta.id);
        Ok(rows)
    }

    // === Worker node groups ===

    async fn add_worker_node_group(
        &self,
        cluster_id: i64,
        spec: WorkerNodeGroupSpec,
    ) -> Result<WorkerNodeGroup> {
        spec.validate()?;
        let mut inner = self.write()?;
        if inner.live_cluster(cluster_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                cluster_id
            )));
        }
        inner.check_worker_machine_config(spec.machine_config_id)?;
        let id = inner.alloc_id();
        let entity = spec.into_entity(RecordMeta::new(id), cluster_id);
        inner.worker_node_groups.insert(id, entity.clone());
        Ok(entity)
    }

    async fn update_worker_node_group(
        &self,
        id: i64,
        spec: WorkerNodeGroupSpec,
    ) -> Result<WorkerNodeGroup> {
        spec.validate()?;
        let mut inner = self.write()?;
        let existing = inner
            .worker_node_groups
            .get(&id)
            .filter(|g| !g.meta.is_deleted())
            .ok_or_else(|| StoreError::NotFound(format!("worker node group {}", id)))?;
        let cluster_id = existing.cluster_id;
        let mut meta = existing.meta.clone();
        inner.check_worker_machine_config(spec.machine_config_id)?;
        meta.touch();
        let entity = spec.into_entity(meta, cluster_id);
        inner.worker_node_groups.insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete_worker_node_group(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        let now = Utc::now();
        match inner
            .worker_node_groups
            .get_mut(&id)
            .filter(|g| !g.meta.is_deleted())
        {
            Some(group) => {
                group.meta.mark_deleted(now);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("worker node group {}", id))),
        }
    }

    async fn list_worker_node_groups(&self, cluster_id: i64) -> Result<Vec<WorkerNodeGroup>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .worker_node_groups
            .values()
            .filter(|g| !g.meta.is_deleted() && g.cluster_id == cluster_id)
            .cloned()
            .collect();
        rows.sort_by_key(|g| g.meta.id);
        Ok(rows)
    }

    // === Applications ===

    async fn create_application(&self, spec: ArgoCdApplicationSpec) -> Result<ArgoCdApplication> {
        spec.validate()?;
        let mut inner = self.write()?;
        if inner.live_cluster(spec.cluster_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                spec.cluster_id
            )));
        }
        inner.check_application_unique(spec.cluster_id, &spec.name, &spec.namespace, None)?;
        let id = inner.alloc_id();
        let entity = spec.into_entity(RecordMeta::new(id));
        inner.applications.insert(id, entity.clone());
        Ok(entity)
    }

    async fn get_application(&self, id: i64) -> Result<ArgoCdApplication> {
        let inner = self.read()?;
        inner
            .live_application(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("application {}", id)))
    }

    async fn update_application(
        &self,
        id: i64,
        spec: ArgoCdApplicationSpec,
    ) -> Result<ArgoCdApplication> {
        spec.validate()?;
        let mut inner = self.write()?;
        let mut meta = inner
            .live_application(id)
            .map(|a| a.meta.clone())
            .ok_or_else(|| StoreError::NotFound(format!("application {}", id)))?;
        if inner.live_cluster(spec.cluster_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                spec.cluster_id
            )));
        }
        inner.check_application_unique(spec.cluster_id, &spec.name, &spec.namespace, Some(id))?;
        meta.touch();
        let entity = spec.into_entity(meta);
        inner.applications.insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete_application(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner.live_application(id).is_none() {
            return Err(StoreError::NotFound(format!("application {}", id)));
        }
        let now = Utc::now();
        if let Some(app) = inner.applications.get_mut(&id) {
            app.meta.mark_deleted(now);
        }
        for join in inner.application_tags.iter_mut() {
            if join.application_id == id && join.deleted_at.is_none() {
                join.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn list_applications(&self, cluster_id: i64) -> Result<Vec<ArgoCdApplication>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .applications
            .values()
            .filter(|a| !a.meta.is_deleted() && a.cluster_id == cluster_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.meta.id);
        Ok(rows)
    }

    // === Tags ===

    async fn create_tag(&self, spec: TagSpec) -> Result<Tag> {
        spec.validate()?;
        let mut inner = self.write()?;
        let taken = inner
            .tags
            .values()
            .any(|t| !t.meta.is_deleted() && t.key == spec.key && t.value == spec.value);
        if taken {
            return Err(StoreError::Conflict(format!(
                "tag {}={} already exists",
                spec.key, spec.value
            )));
        }
        let id = inner.alloc_id();
        let entity = spec.into_entity(RecordMeta::new(id));
        inner.tags.insert(id, entity.clone());
        Ok(entity)
    }

    async fn get_tag(&self, id: i64) -> Result<Tag> {
        let inner = self.read()?;
        inner
            .live_tag(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tag {}", id)))
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner.live_tag(id).is_none() {
            return Err(StoreError::NotFound(format!("tag {}", id)));
        }
        let attached = inner
            .cluster_tags
            .iter()
            .any(|j| j.tag_id == id && j.deleted_at.is_none())
            || inner
                .application_tags
                .iter()
                .any(|j| j.tag_id == id && j.deleted_at.is_none());
        if attached {
            return Err(StoreError::Conflict(format!(
                "tag {} is attached to a live cluster or application",
                id
            )));
        }
        let now = Utc::now();
        if let Some(tag) = inner.tags.get_mut(&id) {
            tag.meta.mark_deleted(now);
        }
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .tags
            .values()
            .filter(|t| !t.meta.is_deleted())
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.meta.id);
        Ok(rows)
    }

    async fn attach_cluster_tag(&self, cluster_id: i64, tag_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner.live_cluster(cluster_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                cluster_id
            )));
        }
        if inner.live_tag(tag_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "tag {} does not exist or is deleted",
                tag_id
            )));
        }
        let now = Utc::now();
        let existing = inner
            .cluster_tags
            .iter()
            .position(|j| j.cluster_id == cluster_id && j.tag_id == tag_id);
        match existing {
            // Already attached is a no-op; a retired join is revived
            Some(idx) => {
                let join = &mut inner.cluster_tags[idx];
                if join.deleted_at.is_some() {
                    join.deleted_at = None;
                    join.attached_at = now;
                }
            }
            None => inner.cluster_tags.push(ClusterTag {
                cluster_id,
                tag_id,
                attached_at: now,
                deleted_at: None,
            }),
        }
        Ok(())
    }

    async fn detach_cluster_tag(&self, cluster_id: i64, tag_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        let now = Utc::now();
        if let Some(join) = inner
            .cluster_tags
            .iter_mut()
            .find(|j| j.cluster_id == cluster_id && j.tag_id == tag_id && j.deleted_at.is_none())
        {
            join.deleted_at = Some(now);
        }
        Ok(())
    }

    async fn list_cluster_tags(&self, cluster_id: i64) -> Result<Vec<Tag>> {
        let inner = self.read()?;
        let mut joins: Vec<&ClusterTag> = inner
            .cluster_tags
            .iter()
            .filter(|j| j.cluster_id == cluster_id && j.deleted_at.is_none())
            .collect();
        joins.sort_by_key(|j| j.attached_at);
        Ok(joins
            .iter()
            .filter_map(|j| inner.tags.get(&j.tag_id).cloned())
            .collect())
    }

    async fn attach_application_tag(&self, application_id: i64, tag_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner.live_application(application_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "application {} does not exist or is deleted",
                application_id
            )));
        }
        if inner.live_tag(tag_id).is_none() {
            return Err(StoreError::Integrity(format!(
                "tag {} does not exist or is deleted",
                tag_id
            )));
        }
        let now = Utc::now();
        let existing = inner
            .application_tags
            .iter()
            .position(|j| j.application_id == application_id && j.tag_id == tag_id);
        match existing {
            Some(idx) => {
                let join = &mut inner.application_tags[idx];
                if join.deleted_at.is_some() {
                    join.deleted_at = None;
                    join.attached_at = now;
                }
            }
            None => inner.application_tags.push(ApplicationTag {
                application_id,
                tag_id,
                attached_at: now,
                deleted_at: None,
            }),
        }
        Ok(())
    }

    async fn detach_application_tag(&self, application_id: i64, tag_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        let now = Utc::now();
        if let Some(join) = inner.application_tags.iter_mut().find(|j| {
            j.application_id == application_id && j.tag_id == tag_id && j.deleted_at.is_none()
        }) {
            join.deleted_at = Some(now);
        }
        Ok(())
    }

    async fn list_application_tags(&self, application_id: i64) -> Result<Vec<Tag>> {
        let inner = self.read()?;
        let mut joins: Vec<&ApplicationTag> = inner
            .application_tags
            .iter()
            .filter(|j| j.application_id == application_id && j.deleted_at.is_none())
            .collect();
        joins.sort_by_key(|j| j.attached_at);
        Ok(joins
            .iter()
            .filter_map(|j| inner.tags.get(&j.tag_id).cloned())
            .collect())
    }

    // === Environments ===

    async fn create_environment(&self, name: &str) -> Result<Environment> {
        let name: EnvironmentName = name.parse()?;
        let mut inner = self.write()?;
        let taken = inner
            .environments
            .values()
            .any(|e| !e.meta.is_deleted() && e.name == name);
        if taken {
            return Err(StoreError::Conflict(format!(
                "environment {} already exists",
                name.as_str()
            )));
        }
        let id = inner.alloc_id();
        let entity = Environment {
            meta: RecordMeta::new(id),
            name,
        };
        inner.environments.insert(id, entity.clone());
        Ok(entity)
    }

    async fn get_environment(&self, id: i64) -> Result<Environment> {
        let inner = self.read()?;
        inner
            .environments
            .get(&id)
            .filter(|e| !e.meta.is_deleted())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("environment {}", id)))
    }

    async fn get_environment_by_name(&self, name: &str) -> Result<Environment> {
        let name: EnvironmentName = name.parse()?;
        let inner = self.read()?;
        inner
            .environments
            .values()
            .find(|e| !e.meta.is_deleted() && e.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("environment {}", name.as_str())))
    }

    async fn delete_environment(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner
            .environments
            .get(&id)
            .filter(|e| !e.meta.is_deleted())
            .is_none()
        {
            return Err(StoreError::NotFound(format!("environment {}", id)));
        }
        let referenced = inner
            .clusters
            .values()
            .any(|c| !c.meta.is_deleted() && c.environment_id == id);
        if referenced {
            return Err(StoreError::Conflict(format!(
                "environment {} is referenced by a live cluster",
                id
            )));
        }
        let now = Utc::now();
        if let Some(entity) = inner.environments.get_mut(&id) {
            entity.meta.mark_deleted(now);
        }
        Ok(())
    }

    async fn list_environments(&self) -> Result<Vec<Environment>> {
        let inner = self.read()?;
        let mut rows: Vec<_> = inner
            .environments
            .values()
            .filter(|e| !e.meta.is_deleted())
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.meta.id);
        Ok(rows)
    }
}
