//! Tests for the Store trait.
//!
//! These tests are written against the `Store` trait, so they can be run
//! against any implementation. The integrity properties (atomic cluster
//! creation, restrict-on-shared deletes, cascade-on-owned deletes) run
//! against both the memory and SQLite backends.

use super::*;
use crate::error::StoreError;
use crate::model::{ClusterType, EnvironmentName, MachineRole};
use std::sync::Arc;

/// Create a memory store for testing
fn create_memory_store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

/// Create a SQLite store for testing (uses tempdir)
async fn create_sqlite_store() -> Arc<dyn Store> {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("test.db");
    // Note: we leak the tempdir to keep the file around for the test
    std::mem::forget(tmp);
    Arc::new(SqliteStore::open(&path).await.unwrap())
}

/// Create a test store instance (default: memory)
fn create_test_store() -> Arc<dyn Store> {
    create_memory_store()
}

fn datacenter_spec(name: &str) -> DatacenterConfigurationSpec {
    DatacenterConfigurationSpec {
        name: name.to_string(),
        datacenter: "east-1".to_string(),
        network: "VM Network".to_string(),
        server: "vcenter.example.com".to_string(),
        insecure: false,
        thumbprint: "AB:CD:EF:01".to_string(),
    }
}

fn network_spec() -> ClusterNetworkSpec {
    ClusterNetworkSpec {
        cni_plugin: "cilium".to_string(),
        pods_cidr_blocks: vec!["192.168.0.0/16".to_string()],
        services_cidr_blocks: vec!["10.96.0.0/12".to_string()],
    }
}

fn machine_spec(name: &str, role: MachineRole) -> MachineConfigSpec {
    MachineConfigSpec {
        name: name.to_string(),
        annotations: vec!["team=platform".to_string()],
        clone_mode: "linkedClone".to_string(),
        datastore: "datastore1".to_string(),
        disk_gib: 60,
        folder: "/Datacenter/vm".to_string(),
        memory_mib: 8192,
        num_cpus: 4,
        os_family: "bottlerocket".to_string(),
        resource_pool: "/Datacenter/host/cluster/Resources".to_string(),
        template: "bottlerocket-v1.31".to_string(),
        machine_role: role,
    }
}

fn worker_group_spec(name: &str, machine_config_id: i64) -> WorkerNodeGroupSpec {
    WorkerNodeGroupSpec {
        name: name.to_string(),
        count: 3,
        machine_config_id,
    }
}

fn application_spec(cluster_id: i64, name: &str, namespace: &str) -> ArgoCdApplicationSpec {
    ArgoCdApplicationSpec {
        cluster_id,
        name: name.to_string(),
        namespace: namespace.to_string(),
        repo_url: "https://git.example.com/apps.git".to_string(),
        path: format!("apps/{}", name),
        target_revision: "HEAD".to_string(),
        project: "default".to_string(),
        sync_policy: r#"{"automated":{"prune":true}}"#.to_string(),
    }
}

/// Ids of the referenced rows set up for a cluster
struct Fixture {
    datacenter_id: i64,
    network_id: i64,
    control_plane_id: i64,
    etcd_id: i64,
    worker_id: i64,
    environment_id: i64,
}

async fn setup_references(store: &Arc<dyn Store>) -> Fixture {
    let datacenter = store
        .create_datacenter_configuration(datacenter_spec("dc-east"))
        .await
        .unwrap();
    let network = store.create_cluster_network(network_spec()).await.unwrap();
    let control_plane = store
        .create_machine_config(machine_spec("cp", MachineRole::ControlPlane))
        .await
        .unwrap();
    let etcd = store
        .create_machine_config(machine_spec("etcd", MachineRole::Etcd))
        .await
        .unwrap();
    let worker = store
        .create_machine_config(machine_spec("worker", MachineRole::Worker))
        .await
        .unwrap();
    let environment = store.create_environment("PROD").await.unwrap();

    Fixture {
        datacenter_id: datacenter.meta.id,
        network_id: network.meta.id,
        control_plane_id: control_plane.meta.id,
        etcd_id: etcd.meta.id,
        worker_id: worker.meta.id,
        environment_id: environment.meta.id,
    }
}

fn cluster_spec(fixture: &Fixture, name: &str) -> ClusterSpec {
    ClusterSpec {
        name: name.to_string(),
        namespace: "default".to_string(),
        platform_version: "v0.19.0".to_string(),
        kubernetes_version: "1.31".to_string(),
        cluster_type: ClusterType::Management,
        datacenter_config_id: fixture.datacenter_id,
        cluster_network_id: fixture.network_id,
        control_plane_config_id: fixture.control_plane_id,
        etcd_config_id: fixture.etcd_id,
        environment_id: fixture.environment_id,
    }
}

// ============================================================================
// Configuration entity CRUD
// ============================================================================

#[tokio::test]
async fn datacenter_configuration_crud() {
    let store = create_test_store();

    let created = store
        .create_datacenter_configuration(datacenter_spec("dc-east"))
        .await
        .unwrap();
    assert!(created.meta.id > 0);
    assert!(!created.meta.is_deleted());

    let fetched = store
        .get_datacenter_configuration(created.meta.id)
        .await
        .unwrap();
    assert_eq!(fetched.name, "dc-east");

    let mut spec = datacenter_spec("dc-east");
    spec.server = "vcenter2.example.com".to_string();
    let updated = store
        .update_datacenter_configuration(created.meta.id, spec)
        .await
        .unwrap();
    assert_eq!(updated.server, "vcenter2.example.com");
    assert_eq!(updated.meta.id, created.meta.id);

    store
        .delete_datacenter_configuration(created.meta.id)
        .await
        .unwrap();
    let err = store
        .get_datacenter_configuration(created.meta.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn datacenter_configuration_update_revalidates() {
    let store = create_test_store();
    let created = store
        .create_datacenter_configuration(datacenter_spec("dc-east"))
        .await
        .unwrap();

    let mut spec = datacenter_spec("dc-east");
    spec.thumbprint = String::new();
    let err = store
        .update_datacenter_configuration(created.meta.id, spec)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // Failed update leaves the row unchanged
    let fetched = store
        .get_datacenter_configuration(created.meta.id)
        .await
        .unwrap();
    assert_eq!(fetched.thumbprint, "AB:CD:EF:01");
}

#[tokio::test]
async fn cluster_network_rejects_overlap_on_create() {
    let store = create_test_store();
    let spec = ClusterNetworkSpec {
        cni_plugin: "cilium".to_string(),
        pods_cidr_blocks: vec!["10.0.0.0/8".to_string()],
        services_cidr_blocks: vec!["10.96.0.0/12".to_string()],
    };
    let err = store.create_cluster_network(spec).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.list_cluster_networks().await.unwrap().is_empty());
}

#[tokio::test]
async fn machine_config_rejects_bad_shape() {
    let store = create_test_store();
    let mut spec = machine_spec("cp", MachineRole::ControlPlane);
    spec.memory_mib = 0;
    let err = store.create_machine_config(spec).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn machine_config_round_trips_annotations() {
    let store = create_sqlite_store().await;
    let created = store
        .create_machine_config(machine_spec("cp", MachineRole::ControlPlane))
        .await
        .unwrap();
    let fetched = store.get_machine_config(created.meta.id).await.unwrap();
    assert_eq!(fetched.annotations, vec!["team=platform".to_string()]);
    assert_eq!(fetched.machine_role, MachineRole::ControlPlane);
}

// ============================================================================
// Cluster aggregate
// ============================================================================

async fn test_create_cluster_with_worker_groups(store: Arc<dyn Store>) {
    let fixture = setup_references(&store).await;

    let cluster = store
        .create_cluster(
            cluster_spec(&fixture, "mgmt-1"),
            vec![
                worker_group_spec("md-0", fixture.worker_id),
                worker_group_spec("md-1", fixture.worker_id),
            ],
        )
        .await
        .unwrap();

    assert_eq!(cluster.name, "mgmt-1");
    assert_eq!(cluster.cluster_type, ClusterType::Management);

    let groups = store.list_worker_node_groups(cluster.meta.id).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.cluster_id == cluster.meta.id));
}

#[tokio::test]
async fn memory_create_cluster_with_worker_groups() {
    test_create_cluster_with_worker_groups(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_create_cluster_with_worker_groups() {
    test_create_cluster_with_worker_groups(create_sqlite_store().await).await;
}

async fn test_create_cluster_deleted_reference_is_integrity_error(store: Arc<dyn Store>) {
    let fixture = setup_references(&store).await;
    store
        .delete_datacenter_configuration(fixture.datacenter_id)
        .await
        .unwrap();

    let err = store
        .create_cluster(
            cluster_spec(&fixture, "mgmt-1"),
            vec![worker_group_spec("md-0", fixture.worker_id)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));

    // All-or-nothing: no cluster and no worker groups were written
    assert!(store.list_clusters().await.unwrap().is_empty());
}

#[tokio::test]
async fn memory_create_cluster_deleted_reference() {
    test_create_cluster_deleted_reference_is_integrity_error(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_create_cluster_deleted_reference() {
    test_create_cluster_deleted_reference_is_integrity_error(create_sqlite_store().await).await;
}

async fn test_create_cluster_wrong_worker_role_is_atomic(store: Arc<dyn Store>) {
    let fixture = setup_references(&store).await;

    // Second group points at the etcd config; the whole create must fail
    let err = store
        .create_cluster(
            cluster_spec(&fixture, "mgmt-1"),
            vec![
                worker_group_spec("md-0", fixture.worker_id),
                worker_group_spec("md-1", fixture.etcd_id),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.list_clusters().await.unwrap().is_empty());
}

#[tokio::test]
async fn memory_create_cluster_wrong_worker_role() {
    test_create_cluster_wrong_worker_role_is_atomic(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_create_cluster_wrong_worker_role() {
    test_create_cluster_wrong_worker_role_is_atomic(create_sqlite_store().await).await;
}

#[tokio::test]
async fn update_cluster_checks_swapped_references() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();

    let mut spec = cluster_spec(&fixture, "mgmt-1");
    spec.datacenter_config_id = 9999;
    let err = store.update_cluster(cluster.meta.id, spec).await.unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));

    let mut spec = cluster_spec(&fixture, "mgmt-1-renamed");
    spec.cluster_type = ClusterType::Worker;
    let updated = store.update_cluster(cluster.meta.id, spec).await.unwrap();
    assert_eq!(updated.name, "mgmt-1-renamed");
    assert_eq!(updated.cluster_type, ClusterType::Worker);
}

async fn test_delete_cluster_cascades_to_owned_rows(store: Arc<dyn Store>) {
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(
            cluster_spec(&fixture, "mgmt-1"),
            vec![worker_group_spec("md-0", fixture.worker_id)],
        )
        .await
        .unwrap();
    let app = store
        .create_application(application_spec(cluster.meta.id, "app1", "default"))
        .await
        .unwrap();
    let tag = store
        .create_tag(TagSpec {
            key: "env".to_string(),
            value: "prod".to_string(),
        })
        .await
        .unwrap();
    store
        .attach_cluster_tag(cluster.meta.id, tag.meta.id)
        .await
        .unwrap();

    store.delete_cluster(cluster.meta.id).await.unwrap();

    // Owned rows are gone from normal queries
    let err = store.get_cluster(cluster.meta.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(store
        .list_worker_node_groups(cluster.meta.id)
        .await
        .unwrap()
        .is_empty());
    let err = store.get_application(app.meta.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(store.list_cluster_tags(cluster.meta.id).await.unwrap().is_empty());

    // Shared rows stay live
    assert!(store
        .get_datacenter_configuration(fixture.datacenter_id)
        .await
        .is_ok());
    assert!(store.get_machine_config(fixture.worker_id).await.is_ok());
    assert!(store.get_tag(tag.meta.id).await.is_ok());
}

#[tokio::test]
async fn memory_delete_cluster_cascades() {
    test_delete_cluster_cascades_to_owned_rows(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_delete_cluster_cascades() {
    test_delete_cluster_cascades_to_owned_rows(create_sqlite_store().await).await;
}

// ============================================================================
// Restrict-on-shared deletes
// ============================================================================

async fn test_delete_referenced_machine_config_is_conflict(store: Arc<dyn Store>) {
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(
            cluster_spec(&fixture, "mgmt-1"),
            vec![worker_group_spec("md-0", fixture.worker_id)],
        )
        .await
        .unwrap();

    for id in [fixture.control_plane_id, fixture.etcd_id, fixture.worker_id] {
        let err = store.delete_machine_config(id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    // An unreferenced config deletes fine
    let spare = store
        .create_machine_config(machine_spec("spare", MachineRole::Worker))
        .await
        .unwrap();
    store.delete_machine_config(spare.meta.id).await.unwrap();

    // Once the cluster is gone the shared rows become deletable
    store.delete_cluster(cluster.meta.id).await.unwrap();
    store
        .delete_machine_config(fixture.control_plane_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn memory_delete_referenced_machine_config() {
    test_delete_referenced_machine_config_is_conflict(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_delete_referenced_machine_config() {
    test_delete_referenced_machine_config_is_conflict(create_sqlite_store().await).await;
}

#[tokio::test]
async fn delete_referenced_datacenter_and_network_is_conflict() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();

    let err = store
        .delete_datacenter_configuration(fixture.datacenter_id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let err = store.delete_cluster_network(fixture.network_id).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn delete_referenced_environment_is_conflict() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();

    let err = store.delete_environment(fixture.environment_id).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

// ============================================================================
// Worker node groups
// ============================================================================

#[tokio::test]
async fn add_worker_node_group_enforces_role() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();

    let err = store
        .add_worker_node_group(
            cluster.meta.id,
            worker_group_spec("md-0", fixture.control_plane_id),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let group = store
        .add_worker_node_group(cluster.meta.id, worker_group_spec("md-0", fixture.worker_id))
        .await
        .unwrap();
    assert_eq!(group.cluster_id, cluster.meta.id);
}

#[tokio::test]
async fn add_worker_node_group_requires_live_cluster() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let err = store
        .add_worker_node_group(9999, worker_group_spec("md-0", fixture.worker_id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn update_worker_node_group_scales_replicas() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(
            cluster_spec(&fixture, "mgmt-1"),
            vec![worker_group_spec("md-0", fixture.worker_id)],
        )
        .await
        .unwrap();
    let group = store
        .list_worker_node_groups(cluster.meta.id)
        .await
        .unwrap()
        .remove(0);

    let mut spec = worker_group_spec("md-0", fixture.worker_id);
    spec.count = 0;
    let updated = store.update_worker_node_group(group.meta.id, spec).await.unwrap();
    assert_eq!(updated.count, 0);

    let mut spec = worker_group_spec("md-0", fixture.worker_id);
    spec.count = -1;
    let err = store
        .update_worker_node_group(group.meta.id, spec)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

// ============================================================================
// Applications
// ============================================================================

async fn test_application_identity_unique_per_cluster(store: Arc<dyn Store>) {
    let fixture = setup_references(&store).await;
    let cluster_a = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();
    let cluster_b = store
        .create_cluster(cluster_spec(&fixture, "mgmt-2"), vec![])
        .await
        .unwrap();

    store
        .create_application(application_spec(cluster_a.meta.id, "app1", "default"))
        .await
        .unwrap();

    // Same identity under the same cluster conflicts
    let err = store
        .create_application(application_spec(cluster_a.meta.id, "app1", "default"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // Same identity under a different cluster is fine
    store
        .create_application(application_spec(cluster_b.meta.id, "app1", "default"))
        .await
        .unwrap();

    // Different namespace under the same cluster is fine too
    store
        .create_application(application_spec(cluster_a.meta.id, "app1", "staging"))
        .await
        .unwrap();
}

#[tokio::test]
async fn memory_application_identity_unique_per_cluster() {
    test_application_identity_unique_per_cluster(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_application_identity_unique_per_cluster() {
    test_application_identity_unique_per_cluster(create_sqlite_store().await).await;
}

#[tokio::test]
async fn application_requires_live_cluster() {
    let store = create_test_store();
    let err = store
        .create_application(application_spec(9999, "app1", "default"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn application_sync_policy_is_opaque() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();

    // Not JSON; the store stores it verbatim anyway
    let mut spec = application_spec(cluster.meta.id, "app1", "default");
    spec.sync_policy = "whatever the caller wants".to_string();
    let app = store.create_application(spec).await.unwrap();
    let fetched = store.get_application(app.meta.id).await.unwrap();
    assert_eq!(fetched.sync_policy, "whatever the caller wants");
}

// ============================================================================
// Tags
// ============================================================================

async fn test_attach_cluster_tag_is_idempotent(store: Arc<dyn Store>) {
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();
    let tag = store
        .create_tag(TagSpec {
            key: "env".to_string(),
            value: "prod".to_string(),
        })
        .await
        .unwrap();

    store.attach_cluster_tag(cluster.meta.id, tag.meta.id).await.unwrap();
    store.attach_cluster_tag(cluster.meta.id, tag.meta.id).await.unwrap();

    let tags = store.list_cluster_tags(cluster.meta.id).await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].meta.id, tag.meta.id);
}

#[tokio::test]
async fn memory_attach_cluster_tag_idempotent() {
    test_attach_cluster_tag_is_idempotent(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_attach_cluster_tag_idempotent() {
    test_attach_cluster_tag_is_idempotent(create_sqlite_store().await).await;
}

#[tokio::test]
async fn detach_missing_association_is_noop() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();

    // Nothing attached; detaching must not error
    store.detach_cluster_tag(cluster.meta.id, 42).await.unwrap();
    store.detach_application_tag(42, 42).await.unwrap();
}

#[tokio::test]
async fn list_cluster_tags_preserves_insertion_order() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();

    let mut expected = Vec::new();
    for (key, value) in [("env", "prod"), ("team", "platform"), ("tier", "gold")] {
        let tag = store
            .create_tag(TagSpec {
                key: key.to_string(),
                value: value.to_string(),
            })
            .await
            .unwrap();
        store.attach_cluster_tag(cluster.meta.id, tag.meta.id).await.unwrap();
        expected.push(tag.meta.id);
    }

    let listed: Vec<i64> = store
        .list_cluster_tags(cluster.meta.id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.meta.id)
        .collect();
    assert_eq!(listed, expected);

    // Restartable: listing again yields the same sequence
    let again: Vec<i64> = store
        .list_cluster_tags(cluster.meta.id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.meta.id)
        .collect();
    assert_eq!(again, expected);
}

#[tokio::test]
async fn attach_requires_live_endpoints() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();
    let tag = store
        .create_tag(TagSpec {
            key: "env".to_string(),
            value: "prod".to_string(),
        })
        .await
        .unwrap();

    let err = store.attach_cluster_tag(9999, tag.meta.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));

    let err = store.attach_cluster_tag(cluster.meta.id, 9999).await.unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn application_tags_attach_and_detach() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();
    let app = store
        .create_application(application_spec(cluster.meta.id, "app1", "default"))
        .await
        .unwrap();
    let tag = store
        .create_tag(TagSpec {
            key: "tier".to_string(),
            value: "frontend".to_string(),
        })
        .await
        .unwrap();

    store.attach_application_tag(app.meta.id, tag.meta.id).await.unwrap();
    store.attach_application_tag(app.meta.id, tag.meta.id).await.unwrap();
    assert_eq!(store.list_application_tags(app.meta.id).await.unwrap().len(), 1);

    store.detach_application_tag(app.meta.id, tag.meta.id).await.unwrap();
    assert!(store.list_application_tags(app.meta.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn tag_key_is_not_globally_unique() {
    let store = create_test_store();
    store
        .create_tag(TagSpec {
            key: "env".to_string(),
            value: "prod".to_string(),
        })
        .await
        .unwrap();
    // Same key with a different value is a distinct tag
    store
        .create_tag(TagSpec {
            key: "env".to_string(),
            value: "dev".to_string(),
        })
        .await
        .unwrap();
    // The exact pair conflicts
    let err = store
        .create_tag(TagSpec {
            key: "env".to_string(),
            value: "prod".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn delete_attached_tag_is_conflict() {
    let store = create_test_store();
    let fixture = setup_references(&store).await;
    let cluster = store
        .create_cluster(cluster_spec(&fixture, "mgmt-1"), vec![])
        .await
        .unwrap();
    let tag = store
        .create_tag(TagSpec {
            key: "env".to_string(),
            value: "prod".to_string(),
        })
        .await
        .unwrap();
    store.attach_cluster_tag(cluster.meta.id, tag.meta.id).await.unwrap();

    let err = store.delete_tag(tag.meta.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    store.detach_cluster_tag(cluster.meta.id, tag.meta.id).await.unwrap();
    store.delete_tag(tag.meta.id).await.unwrap();
}

// ============================================================================
// Environments
// ============================================================================

async fn test_environment_round_trip(store: Arc<dyn Store>) {
    let created = store.create_environment("PROD").await.unwrap();
    let fetched = store.get_environment(created.meta.id).await.unwrap();
    assert_eq!(fetched.name, EnvironmentName::Prod);
    assert_eq!(fetched.name.as_str(), "PROD");

    let err = store.create_environment("STAGING").await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = store.create_environment("PROD").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn memory_environment_round_trip() {
    test_environment_round_trip(create_memory_store()).await;
}

#[tokio::test]
async fn sqlite_environment_round_trip() {
    test_environment_round_trip(create_sqlite_store().await).await;
}

#[tokio::test]
async fn environment_registry_full_set() {
    let store = create_test_store();
    for name in ["DEV", "QA", "UAT", "PROD"] {
        store.create_environment(name).await.unwrap();
    }
    assert_eq!(store.list_environments().await.unwrap().len(), 4);

    let qa = store.get_environment_by_name("QA").await.unwrap();
    assert_eq!(qa.name, EnvironmentName::Qa);

    // Unreferenced environments can be retired and re-registered
    store.delete_environment(qa.meta.id).await.unwrap();
    assert_eq!(store.list_environments().await.unwrap().len(), 3);
    store.create_environment("QA").await.unwrap();
}

// ============================================================================
// Factory
// ============================================================================

#[tokio::test]
async fn create_store_from_config() {
    let store = create_store(&StoreConfig::Memory).await.unwrap();
    store.create_environment("DEV").await.unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("factory.db");
    std::mem::forget(tmp);
    let store = create_store(&StoreConfig::Sqlite {
        path: path.to_string_lossy().to_string(),
    })
    .await
    .unwrap();
    store.create_environment("DEV").await.unwrap();
}
