//! SQLite storage backend.
//!
//! Persistent storage using SQLite with WAL mode for concurrent reads and
//! fast serialized writes. Unlike a blob store, the schema here is fully
//! relational: one table per entity, typed columns, CHECK constraints on the
//! enumerated columns, and FOREIGN KEY declarations mirroring the reference
//! graph, so the integrity contract holds even against non-conforming
//! direct writes.
//!
//! Every operation that checks a reference before writing runs the check and
//! the write in one transaction, so a delete cannot race past a concurrent
//! reference creation.

use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{
    ArgoCdApplication, ArgoCdApplicationSpec, Cluster, ClusterNetwork, ClusterNetworkSpec,
    ClusterSpec, DatacenterConfiguration, DatacenterConfigurationSpec, Environment,
    EnvironmentName, MachineConfig, MachineConfigSpec, MachineRole, RecordMeta, Tag, TagSpec,
    WorkerNodeGroup, WorkerNodeGroupSpec,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS datacenter_configurations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        datacenter TEXT NOT NULL,
        network TEXT NOT NULL,
        server TEXT NOT NULL,
        insecure INTEGER NOT NULL,
        thumbprint TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cluster_networks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cni_plugin TEXT NOT NULL,
        pods_cidr_blocks TEXT NOT NULL,
        services_cidr_blocks TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS machine_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        annotations TEXT NOT NULL,
        clone_mode TEXT NOT NULL,
        datastore TEXT NOT NULL,
        disk_gib INTEGER NOT NULL CHECK (disk_gib > 0),
        folder TEXT NOT NULL,
        memory_mib INTEGER NOT NULL CHECK (memory_mib > 0),
        num_cpus INTEGER NOT NULL CHECK (num_cpus > 0),
        os_family TEXT NOT NULL,
        resource_pool TEXT NOT NULL,
        template TEXT NOT NULL,
        machine_role TEXT NOT NULL
            CHECK (machine_role IN ('control-plane', 'etcd', 'worker')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS environments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL CHECK (name IN ('DEV', 'QA', 'UAT', 'PROD')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_environments_name
        ON environments(name) WHERE deleted_at IS NULL;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clusters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        platform_version TEXT NOT NULL,
        kubernetes_version TEXT NOT NULL,
        cluster_type TEXT NOT NULL CHECK (cluster_type IN ('Management', 'Worker')),
        datacenter_config_id INTEGER NOT NULL REFERENCES datacenter_configurations(id),
        cluster_network_id INTEGER NOT NULL REFERENCES cluster_networks(id),
        control_plane_config_id INTEGER NOT NULL REFERENCES machine_configs(id),
        etcd_config_id INTEGER NOT NULL REFERENCES machine_configs(id),
        environment_id INTEGER NOT NULL REFERENCES environments(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS worker_node_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cluster_id INTEGER NOT NULL REFERENCES clusters(id),
        name TEXT NOT NULL,
        count INTEGER NOT NULL CHECK (count >= 0),
        machine_config_id INTEGER NOT NULL REFERENCES machine_configs(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_worker_node_groups_cluster
        ON worker_node_groups(cluster_id);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS argocd_applications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cluster_id INTEGER NOT NULL REFERENCES clusters(id),
        name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        repo_url TEXT NOT NULL,
        path TEXT NOT NULL,
        target_revision TEXT NOT NULL,
        project TEXT NOT NULL,
        sync_policy TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_argocd_applications_identity
        ON argocd_applications(cluster_id, name, namespace) WHERE deleted_at IS NULL;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_key_value
        ON tags(key, value) WHERE deleted_at IS NULL;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cluster_tags (
        cluster_id INTEGER NOT NULL REFERENCES clusters(id),
        tag_id INTEGER NOT NULL REFERENCES tags(id),
        attached_at TEXT NOT NULL,
        deleted_at TEXT,
        PRIMARY KEY (cluster_id, tag_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS application_tags (
        application_id INTEGER NOT NULL REFERENCES argocd_applications(id),
        tag_id INTEGER NOT NULL REFERENCES tags(id),
        attached_at TEXT NOT NULL,
        deleted_at TEXT,
        PRIMARY KEY (application_id, tag_id)
    );
    "#,
];

/// SQLite storage backend implementing the configuration model.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.create_tables().await?;
        info!("SQLite store opened at {}", path_str);
        Ok(store)
    }

    /// Get a reference to the underlying SQLite connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(())
    }

    fn to_json(value: &[String]) -> Result<String> {
        serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn from_json(json: &str) -> Result<Vec<String>> {
        serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_meta(row: &SqliteRow) -> RecordMeta {
    RecordMeta {
        id: row.get("id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

fn row_to_datacenter_configuration(row: &SqliteRow) -> DatacenterConfiguration {
    DatacenterConfiguration {
        meta: row_meta(row),
        name: row.get("name"),
        datacenter: row.get("datacenter"),
        network: row.get("network"),
        server: row.get("server"),
        insecure: row.get("insecure"),
        thumbprint: row.get("thumbprint"),
    }
}

fn row_to_cluster_network(row: &SqliteRow) -> Result<ClusterNetwork> {
    let pods: String = row.get("pods_cidr_blocks");
    let services: String = row.get("services_cidr_blocks");
    Ok(ClusterNetwork {
        meta: row_meta(row),
        cni_plugin: row.get("cni_plugin"),
        pods_cidr_blocks: SqliteStore::from_json(&pods)?,
        services_cidr_blocks: SqliteStore::from_json(&services)?,
    })
}

fn row_to_machine_config(row: &SqliteRow) -> Result<MachineConfig> {
    let annotations: String = row.get("annotations");
    let role: String = row.get("machine_role");
    Ok(MachineConfig {
        meta: row_meta(row),
        name: row.get("name"),
        annotations: SqliteStore::from_json(&annotations)?,
        clone_mode: row.get("clone_mode"),
        datastore: row.get("datastore"),
        disk_gib: row.get("disk_gib"),
        folder: row.get("folder"),
        memory_mib: row.get("memory_mib"),
        num_cpus: row.get("num_cpus"),
        os_family: row.get("os_family"),
        resource_pool: row.get("resource_pool"),
        template: row.get("template"),
        machine_role: role.parse()?,
    })
}

fn row_to_cluster(row: &SqliteRow) -> Result<Cluster> {
    let cluster_type: String = row.get("cluster_type");
    Ok(Cluster {
        meta: row_meta(row),
        name: row.get("name"),
        namespace: row.get("namespace"),
        platform_version: row.get("platform_version"),
        kubernetes_version: row.get("kubernetes_version"),
        cluster_type: cluster_type.parse()?,
        datacenter_config_id: row.get("datacenter_config_id"),
        cluster_network_id: row.get("cluster_network_id"),
        control_plane_config_id: row.get("control_plane_config_id"),
        etcd_config_id: row.get("etcd_config_id"),
        environment_id: row.get("environment_id"),
    })
}

fn row_to_worker_node_group(row: &SqliteRow) -> WorkerNodeGroup {
    WorkerNodeGroup {
        meta: row_meta(row),
        cluster_id: row.get("cluster_id"),
        name: row.get("name"),
        count: row.get("count"),
        machine_config_id: row.get("machine_config_id"),
    }
}

fn row_to_application(row: &SqliteRow) -> ArgoCdApplication {
    ArgoCdApplication {
        meta: row_meta(row),
        cluster_id: row.get("cluster_id"),
        name: row.get("name"),
        namespace: row.get("namespace"),
        repo_url: row.get("repo_url"),
        path: row.get("path"),
        target_revision: row.get("target_revision"),
        project: row.get("project"),
        sync_policy: row.get("sync_policy"),
    }
}

fn row_to_tag(row: &SqliteRow) -> Tag {
    Tag {
        meta: row_meta(row),
        key: row.get("key"),
        value: row.get("value"),
    }
}

fn row_to_environment(row: &SqliteRow) -> Result<Environment> {
    let name: String = row.get("name");
    Ok(Environment {
        meta: row_meta(row),
        name: name.parse()?,
    })
}

/// A live row exists in `table` with the given id
async fn exists_live(tx: &mut Transaction<'_, Sqlite>, table: &str, id: i64) -> Result<bool> {
    let query = format!(
        "SELECT COUNT(*) AS cnt FROM {} WHERE id = ? AND deleted_at IS NULL",
        table
    );
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err)?;
    let count: i64 = row.get("cnt");
    Ok(count > 0)
}

/// Verify all five reference targets of a cluster spec are live
async fn check_cluster_references(
    tx: &mut Transaction<'_, Sqlite>,
    spec: &ClusterSpec,
) -> Result<()> {
    let targets = [
        ("datacenter_configurations", "datacenter configuration", spec.datacenter_config_id),
        ("cluster_networks", "cluster network", spec.cluster_network_id),
        ("machine_configs", "control-plane machine config", spec.control_plane_config_id),
        ("machine_configs", "etcd machine config", spec.etcd_config_id),
        ("environments", "environment", spec.environment_id),
    ];
    for (table, label, id) in targets {
        if !exists_live(tx, table, id).await? {
            return Err(StoreError::Integrity(format!(
                "{} {} does not exist or is deleted",
                label, id
            )));
        }
    }
    Ok(())
}

/// The machine config backing a worker node group must be live and carry
/// the worker role
async fn check_worker_machine_config(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<()> {
    let row = sqlx::query(
        "SELECT machine_role FROM machine_configs WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?;

    match row {
        None => Err(StoreError::Integrity(format!(
            "machine config {} does not exist or is deleted",
            id
        ))),
        Some(row) => {
            let role: String = row.get("machine_role");
            if role.parse::<MachineRole>()? != MachineRole::Worker {
                return Err(StoreError::Validation(format!(
                    "machine config {} has role {}, expected worker",
                    id, role
                )));
            }
            Ok(())
        }
    }
}

/// Insert a worker node group row within an open transaction
async fn insert_worker_node_group(
    tx: &mut Transaction<'_, Sqlite>,
    cluster_id: i64,
    spec: &WorkerNodeGroupSpec,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO worker_node_groups \
         (cluster_id, name, count, machine_config_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(cluster_id)
    .bind(&spec.name)
    .bind(spec.count)
    .bind(spec.machine_config_id)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(result.last_insert_rowid())
}

#[async_trait]
impl Store for SqliteStore {
    // === Datacenter configurations ===

    async fn create_datacenter_configuration(
        &self,
        spec: DatacenterConfigurationSpec,
    ) -> Result<DatacenterConfiguration> {
        spec.validate()?;
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO datacenter_configurations \
             (name, datacenter, network, server, insecure, thumbprint, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&spec.name)
        .bind(&spec.datacenter)
        .bind(&spec.network)
        .bind(&spec.server)
        .bind(spec.insecure)
        .bind(&spec.thumbprint)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let mut meta = RecordMeta::new(result.last_insert_rowid());
        meta.created_at = now;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn get_datacenter_configuration(&self, id: i64) -> Result<DatacenterConfiguration> {
        let row = sqlx::query(
            "SELECT * FROM datacenter_configurations WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_datacenter_configuration(&r))
            .ok_or_else(|| StoreError::NotFound(format!("datacenter configuration {}", id)))
    }

    async fn update_datacenter_configuration(
        &self,
        id: i64,
        spec: DatacenterConfigurationSpec,
    ) -> Result<DatacenterConfiguration> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query(
            "SELECT * FROM datacenter_configurations WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let existing = row
            .map(|r| row_to_datacenter_configuration(&r))
            .ok_or_else(|| StoreError::NotFound(format!("datacenter configuration {}", id)))?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE datacenter_configurations SET \
             name = ?, datacenter = ?, network = ?, server = ?, insecure = ?, thumbprint = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&spec.name)
        .bind(&spec.datacenter)
        .bind(&spec.network)
        .bind(&spec.server)
        .bind(spec.insecure)
        .bind(&spec.thumbprint)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = existing.meta;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn delete_datacenter_configuration(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "datacenter_configurations", id).await? {
            return Err(StoreError::NotFound(format!(
                "datacenter configuration {}",
                id
            )));
        }
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM clusters \
             WHERE deleted_at IS NULL AND datacenter_config_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let references: i64 = row.get("cnt");
        if references > 0 {
            return Err(StoreError::Conflict(format!(
                "datacenter configuration {} is referenced by a live cluster",
                id
            )));
        }
        let now = Utc::now();
        sqlx::query(
            "UPDATE datacenter_configurations SET deleted_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_datacenter_configurations(&self) -> Result<Vec<DatacenterConfiguration>> {
        let rows = sqlx::query(
            "SELECT * FROM datacenter_configurations WHERE deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(row_to_datacenter_configuration).collect())
    }

    // === Cluster networks ===

    async fn create_cluster_network(&self, spec: ClusterNetworkSpec) -> Result<ClusterNetwork> {
        spec.validate()?;
        let now = Utc::now();
        let pods = Self::to_json(&spec.pods_cidr_blocks)?;
        let services = Self::to_json(&spec.services_cidr_blocks)?;
        let result = sqlx::query(
            "INSERT INTO cluster_networks \
             (cni_plugin, pods_cidr_blocks, services_cidr_blocks, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&spec.cni_plugin)
        .bind(&pods)
        .bind(&services)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let mut meta = RecordMeta::new(result.last_insert_rowid());
        meta.created_at = now;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn get_cluster_network(&self, id: i64) -> Result<ClusterNetwork> {
        let row = sqlx::query("SELECT * FROM cluster_networks WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => row_to_cluster_network(&row),
            None => Err(StoreError::NotFound(format!("cluster network {}", id))),
        }
    }

    async fn update_cluster_network(
        &self,
        id: i64,
        spec: ClusterNetworkSpec,
    ) -> Result<ClusterNetwork> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query("SELECT * FROM cluster_networks WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let existing = match row {
            Some(row) => row_to_cluster_network(&row)?,
            None => return Err(StoreError::NotFound(format!("cluster network {}", id))),
        };

        let now = Utc::now();
        let pods = Self::to_json(&spec.pods_cidr_blocks)?;
        let services = Self::to_json(&spec.services_cidr_blocks)?;
        sqlx::query(
            "UPDATE cluster_networks SET \
             cni_plugin = ?, pods_cidr_blocks = ?, services_cidr_blocks = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&spec.cni_plugin)
        .bind(&pods)
        .bind(&services)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = existing.meta;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn delete_cluster_network(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "cluster_networks", id).await? {
            return Err(StoreError::NotFound(format!("cluster network {}", id)));
        }
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM clusters \
             WHERE deleted_at IS NULL AND cluster_network_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let references: i64 = row.get("cnt");
        if references > 0 {
            return Err(StoreError::Conflict(format!(
                "cluster network {} is referenced by a live cluster",
                id
            )));
        }
        let now = Utc::now();
        sqlx::query("UPDATE cluster_networks SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_cluster_networks(&self) -> Result<Vec<ClusterNetwork>> {
        let rows = sqlx::query("SELECT * FROM cluster_networks WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_cluster_network).collect()
    }

    // === Machine configs ===

    async fn create_machine_config(&self, spec: MachineConfigSpec) -> Result<MachineConfig> {
        spec.validate()?;
        let now = Utc::now();
        let annotations = Self::to_json(&spec.annotations)?;
        let result = sqlx::query(
            "INSERT INTO machine_configs \
             (name, annotations, clone_mode, datastore, disk_gib, folder, memory_mib, \
              num_cpus, os_family, resource_pool, template, machine_role, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&spec.name)
        .bind(&annotations)
        .bind(&spec.clone_mode)
        .bind(&spec.datastore)
        .bind(spec.disk_gib)
        .bind(&spec.folder)
        .bind(spec.memory_mib)
        .bind(spec.num_cpus)
        .bind(&spec.os_family)
        .bind(&spec.resource_pool)
        .bind(&spec.template)
        .bind(spec.machine_role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let mut meta = RecordMeta::new(result.last_insert_rowid());
        meta.created_at = now;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn get_machine_config(&self, id: i64) -> Result<MachineConfig> {
        let row = sqlx::query("SELECT * FROM machine_configs WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => row_to_machine_config(&row),
            None => Err(StoreError::NotFound(format!("machine config {}", id))),
        }
    }

    async fn update_machine_config(
        &self,
        id: i64,
        spec: MachineConfigSpec,
    ) -> Result<MachineConfig> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query("SELECT * FROM machine_configs WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let existing = match row {
            Some(row) => row_to_machine_config(&row)?,
            None => return Err(StoreError::NotFound(format!("machine config {}", id))),
        };

        let now = Utc::now();
        let annotations = Self::to_json(&spec.annotations)?;
        sqlx::query(
            "UPDATE machine_configs SET \
             name = ?, annotations = ?, clone_mode = ?, datastore = ?, disk_gib = ?, folder = ?, \
             memory_mib = ?, num_cpus = ?, os_family = ?, resource_pool = ?, template = ?, \
             machine_role = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&spec.name)
        .bind(&annotations)
        .bind(&spec.clone_mode)
        .bind(&spec.datastore)
        .bind(spec.disk_gib)
        .bind(&spec.folder)
        .bind(spec.memory_mib)
        .bind(spec.num_cpus)
        .bind(&spec.os_family)
        .bind(&spec.resource_pool)
        .bind(&spec.template)
        .bind(spec.machine_role.as_str())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = existing.meta;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn delete_machine_config(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "machine_configs", id).await? {
            return Err(StoreError::NotFound(format!("machine config {}", id)));
        }
        let row = sqlx::query(
            "SELECT \
             (SELECT COUNT(*) FROM clusters WHERE deleted_at IS NULL \
              AND (control_plane_config_id = ? OR etcd_config_id = ?)) + \
             (SELECT COUNT(*) FROM worker_node_groups WHERE deleted_at IS NULL \
              AND machine_config_id = ?) AS cnt",
        )
        .bind(id)
        .bind(id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let references: i64 = row.get("cnt");
        if references > 0 {
            return Err(StoreError::Conflict(format!(
                "machine config {} is referenced by a live cluster or worker node group",
                id
            )));
        }
        let now = Utc::now();
        sqlx::query("UPDATE machine_configs SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_machine_configs(&self) -> Result<Vec<MachineConfig>> {
        let rows = sqlx::query("SELECT * FROM machine_configs WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_machine_config).collect()
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

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        check_cluster_references(&mut tx, &spec).await?;
        for group in &worker_groups {
            check_worker_machine_config(&mut tx, group.machine_config_id).await?;
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO clusters \
             (name, namespace, platform_version, kubernetes_version, cluster_type, \
              datacenter_config_id, cluster_network_id, control_plane_config_id, \
              etcd_config_id, environment_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&spec.name)
        .bind(&spec.namespace)
        .bind(&spec.platform_version)
        .bind(&spec.kubernetes_version)
        .bind(spec.cluster_type.as_str())
        .bind(spec.datacenter_config_id)
        .bind(spec.cluster_network_id)
        .bind(spec.control_plane_config_id)
        .bind(spec.etcd_config_id)
        .bind(spec.environment_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let cluster_id = result.last_insert_rowid();

        for group in &worker_groups {
            insert_worker_node_group(&mut tx, cluster_id, group, now).await?;
        }
        tx.commit().await.map_err(db_err)?;

        let mut meta = RecordMeta::new(cluster_id);
        meta.created_at = now;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn get_cluster(&self, id: i64) -> Result<Cluster> {
        let row = sqlx::query("SELECT * FROM clusters WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => row_to_cluster(&row),
            None => Err(StoreError::NotFound(format!("cluster {}", id))),
        }
    }

    async fn update_cluster(&self, id: i64, spec: ClusterSpec) -> Result<Cluster> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query("SELECT * FROM clusters WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let existing = match row {
            Some(row) => row_to_cluster(&row)?,
            None => return Err(StoreError::NotFound(format!("cluster {}", id))),
        };
        check_cluster_references(&mut tx, &spec).await?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE clusters SET \
             name = ?, namespace = ?, platform_version = ?, kubernetes_version = ?, \
             cluster_type = ?, datacenter_config_id = ?, cluster_network_id = ?, \
             control_plane_config_id = ?, etcd_config_id = ?, environment_id = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&spec.name)
        .bind(&spec.namespace)
        .bind(&spec.platform_version)
        .bind(&spec.kubernetes_version)
        .bind(spec.cluster_type.as_str())
        .bind(spec.datacenter_config_id)
        .bind(spec.cluster_network_id)
        .bind(spec.control_plane_config_id)
        .bind(spec.etcd_config_id)
        .bind(spec.environment_id)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = existing.meta;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn delete_cluster(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "clusters", id).await? {
            return Err(StoreError::NotFound(format!("cluster {}", id)));
        }
        let now = Utc::now();
        sqlx::query("UPDATE clusters SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        // Cascade to owned rows only; shared configuration stays live
        sqlx::query(
            "UPDATE worker_node_groups SET deleted_at = ?, updated_at = ? \
             WHERE cluster_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "UPDATE argocd_applications SET deleted_at = ?, updated_at = ? \
             WHERE cluster_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "UPDATE cluster_tags SET deleted_at = ? WHERE cluster_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let rows = sqlx::query("SELECT * FROM clusters WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_cluster).collect()
    }

    // === Worker node groups ===

    async fn add_worker_node_group(
        &self,
        cluster_id: i64,
        spec: WorkerNodeGroupSpec,
    ) -> Result<WorkerNodeGroup> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "clusters", cluster_id).await? {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                cluster_id
            )));
        }
        check_worker_machine_config(&mut tx, spec.machine_config_id).await?;

        let now = Utc::now();
        let id = insert_worker_node_group(&mut tx, cluster_id, &spec, now).await?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = RecordMeta::new(id);
        meta.created_at = now;
        meta.updated_at = now;
        Ok(spec.into_entity(meta, cluster_id))
    }

    async fn update_worker_node_group(
        &self,
        id: i64,
        spec: WorkerNodeGroupSpec,
    ) -> Result<WorkerNodeGroup> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query("SELECT * FROM worker_node_groups WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let existing = match row {
            Some(row) => row_to_worker_node_group(&row),
            None => return Err(StoreError::NotFound(format!("worker node group {}", id))),
        };
        check_worker_machine_config(&mut tx, spec.machine_config_id).await?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE worker_node_groups SET name = ?, count = ?, machine_config_id = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&spec.name)
        .bind(spec.count)
        .bind(spec.machine_config_id)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = existing.meta;
        meta.updated_at = now;
        Ok(spec.into_entity(meta, existing.cluster_id))
    }

    async fn delete_worker_node_group(&self, id: i64) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE worker_node_groups SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("worker node group {}", id)));
        }
        Ok(())
    }

    async fn list_worker_node_groups(&self, cluster_id: i64) -> Result<Vec<WorkerNodeGroup>> {
        let rows = sqlx::query(
            "SELECT * FROM worker_node_groups \
             WHERE cluster_id = ? AND deleted_at IS NULL ORDER BY id",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(row_to_worker_node_group).collect())
    }

    // === Applications ===

    async fn create_application(&self, spec: ArgoCdApplicationSpec) -> Result<ArgoCdApplication> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "clusters", spec.cluster_id).await? {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                spec.cluster_id
            )));
        }
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM argocd_applications \
             WHERE cluster_id = ? AND name = ? AND namespace = ? AND deleted_at IS NULL",
        )
        .bind(spec.cluster_id)
        .bind(&spec.name)
        .bind(&spec.namespace)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let taken: i64 = row.get("cnt");
        if taken > 0 {
            return Err(StoreError::Conflict(format!(
                "application {}/{} already exists in cluster {}",
                spec.namespace, spec.name, spec.cluster_id
            )));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO argocd_applications \
             (cluster_id, name, namespace, repo_url, path, target_revision, project, \
              sync_policy, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(spec.cluster_id)
        .bind(&spec.name)
        .bind(&spec.namespace)
        .bind(&spec.repo_url)
        .bind(&spec.path)
        .bind(&spec.target_revision)
        .bind(&spec.project)
        .bind(&spec.sync_policy)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = RecordMeta::new(result.last_insert_rowid());
        meta.created_at = now;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn get_application(&self, id: i64) -> Result<ArgoCdApplication> {
        let row =
            sqlx::query("SELECT * FROM argocd_applications WHERE id = ? AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(|r| row_to_application(&r))
            .ok_or_else(|| StoreError::NotFound(format!("application {}", id)))
    }

    async fn update_application(
        &self,
        id: i64,
        spec: ArgoCdApplicationSpec,
    ) -> Result<ArgoCdApplication> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row =
            sqlx::query("SELECT * FROM argocd_applications WHERE id = ? AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        let existing = row
            .map(|r| row_to_application(&r))
            .ok_or_else(|| StoreError::NotFound(format!("application {}", id)))?;
        if !exists_live(&mut tx, "clusters", spec.cluster_id).await? {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                spec.cluster_id
            )));
        }
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM argocd_applications \
             WHERE cluster_id = ? AND name = ? AND namespace = ? AND deleted_at IS NULL \
             AND id != ?",
        )
        .bind(spec.cluster_id)
        .bind(&spec.name)
        .bind(&spec.namespace)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let taken: i64 = row.get("cnt");
        if taken > 0 {
            return Err(StoreError::Conflict(format!(
                "application {}/{} already exists in cluster {}",
                spec.namespace, spec.name, spec.cluster_id
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE argocd_applications SET \
             cluster_id = ?, name = ?, namespace = ?, repo_url = ?, path = ?, \
             target_revision = ?, project = ?, sync_policy = ?, updated_at = ? WHERE id = ?",
        )
        .bind(spec.cluster_id)
        .bind(&spec.name)
        .bind(&spec.namespace)
        .bind(&spec.repo_url)
        .bind(&spec.path)
        .bind(&spec.target_revision)
        .bind(&spec.project)
        .bind(&spec.sync_policy)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = existing.meta;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn delete_application(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE argocd_applications SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("application {}", id)));
        }
        sqlx::query(
            "UPDATE application_tags SET deleted_at = ? \
             WHERE application_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_applications(&self, cluster_id: i64) -> Result<Vec<ArgoCdApplication>> {
        let rows = sqlx::query(
            "SELECT * FROM argocd_applications \
             WHERE cluster_id = ? AND deleted_at IS NULL ORDER BY id",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(row_to_application).collect())
    }

    // === Tags ===

    async fn create_tag(&self, spec: TagSpec) -> Result<Tag> {
        spec.validate()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM tags \
             WHERE key = ? AND value = ? AND deleted_at IS NULL",
        )
        .bind(&spec.key)
        .bind(&spec.value)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let taken: i64 = row.get("cnt");
        if taken > 0 {
            return Err(StoreError::Conflict(format!(
                "tag {}={} already exists",
                spec.key, spec.value
            )));
        }

        let now = Utc::now();
        let result =
            sqlx::query("INSERT INTO tags (key, value, created_at, updated_at) VALUES (?, ?, ?, ?)")
                .bind(&spec.key)
                .bind(&spec.value)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = RecordMeta::new(result.last_insert_rowid());
        meta.created_at = now;
        meta.updated_at = now;
        Ok(spec.into_entity(meta))
    }

    async fn get_tag(&self, id: i64) -> Result<Tag> {
        let row = sqlx::query("SELECT * FROM tags WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|r| row_to_tag(&r))
            .ok_or_else(|| StoreError::NotFound(format!("tag {}", id)))
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "tags", id).await? {
            return Err(StoreError::NotFound(format!("tag {}", id)));
        }
        let row = sqlx::query(
            "SELECT \
             (SELECT COUNT(*) FROM cluster_tags WHERE tag_id = ? AND deleted_at IS NULL) + \
             (SELECT COUNT(*) FROM application_tags WHERE tag_id = ? AND deleted_at IS NULL) \
             AS cnt",
        )
        .bind(id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let attached: i64 = row.get("cnt");
        if attached > 0 {
            return Err(StoreError::Conflict(format!(
                "tag {} is attached to a live cluster or application",
                id
            )));
        }
        let now = Utc::now();
        sqlx::query("UPDATE tags SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT * FROM tags WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_tag).collect())
    }

    async fn attach_cluster_tag(&self, cluster_id: i64, tag_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "clusters", cluster_id).await? {
            return Err(StoreError::Integrity(format!(
                "cluster {} does not exist or is deleted",
                cluster_id
            )));
        }
        if !exists_live(&mut tx, "tags", tag_id).await? {
            return Err(StoreError::Integrity(format!(
                "tag {} does not exist or is deleted",
                tag_id
            )));
        }
        let now = Utc::now();
        // A live join is left untouched; a retired one is revived
        sqlx::query(
            "INSERT INTO cluster_tags (cluster_id, tag_id, attached_at) VALUES (?, ?, ?) \
             ON CONFLICT(cluster_id, tag_id) DO UPDATE SET \
             attached_at = CASE WHEN cluster_tags.deleted_at IS NULL \
                 THEN cluster_tags.attached_at ELSE excluded.attached_at END, \
             deleted_at = NULL",
        )
        .bind(cluster_id)
        .bind(tag_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn detach_cluster_tag(&self, cluster_id: i64, tag_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE cluster_tags SET deleted_at = ? \
             WHERE cluster_id = ? AND tag_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(cluster_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_cluster_tags(&self, cluster_id: i64) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT t.* FROM tags t \
             INNER JOIN cluster_tags ct ON t.id = ct.tag_id \
             WHERE ct.cluster_id = ? AND ct.deleted_at IS NULL \
             ORDER BY ct.attached_at, t.id",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(row_to_tag).collect())
    }

    async fn attach_application_tag(&self, application_id: i64, tag_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "argocd_applications", application_id).await? {
            return Err(StoreError::Integrity(format!(
                "application {} does not exist or is deleted",
                application_id
            )));
        }
        if !exists_live(&mut tx, "tags", tag_id).await? {
            return Err(StoreError::Integrity(format!(
                "tag {} does not exist or is deleted",
                tag_id
            )));
        }
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO application_tags (application_id, tag_id, attached_at) VALUES (?, ?, ?) \
             ON CONFLICT(application_id, tag_id) DO UPDATE SET \
             attached_at = CASE WHEN application_tags.deleted_at IS NULL \
                 THEN application_tags.attached_at ELSE excluded.attached_at END, \
             deleted_at = NULL",
        )
        .bind(application_id)
        .bind(tag_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn detach_application_tag(&self, application_id: i64, tag_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE application_tags SET deleted_at = ? \
             WHERE application_id = ? AND tag_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(application_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_application_tags(&self, application_id: i64) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT t.* FROM tags t \
             INNER JOIN application_tags at ON t.id = at.tag_id \
             WHERE at.application_id = ? AND at.deleted_at IS NULL \
             ORDER BY at.attached_at, t.id",
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(row_to_tag).collect())
    }

    // === Environments ===

    async fn create_environment(&self, name: &str) -> Result<Environment> {
        let name: EnvironmentName = name.parse()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM environments WHERE name = ? AND deleted_at IS NULL")
            .bind(name.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let taken: i64 = row.get("cnt");
        if taken > 0 {
            return Err(StoreError::Conflict(format!(
                "environment {} already exists",
                name.as_str()
            )));
        }

        let now = Utc::now();
        let result =
            sqlx::query("INSERT INTO environments (name, created_at, updated_at) VALUES (?, ?, ?)")
                .bind(name.as_str())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut meta = RecordMeta::new(result.last_insert_rowid());
        meta.created_at = now;
        meta.updated_at = now;
        Ok(Environment { meta, name })
    }

    async fn get_environment(&self, id: i64) -> Result<Environment> {
        let row = sqlx::query("SELECT * FROM environments WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => row_to_environment(&row),
            None => Err(StoreError::NotFound(format!("environment {}", id))),
        }
    }

    async fn get_environment_by_name(&self, name: &str) -> Result<Environment> {
        let name: EnvironmentName = name.parse()?;
        let row = sqlx::query("SELECT * FROM environments WHERE name = ? AND deleted_at IS NULL")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => row_to_environment(&row),
            None => Err(StoreError::NotFound(format!(
                "environment {}",
                name.as_str()
            ))),
        }
    }

    async fn delete_environment(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !exists_live(&mut tx, "environments", id).await? {
            return Err(StoreError::NotFound(format!("environment {}", id)));
        }
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM clusters \
             WHERE deleted_at IS NULL AND environment_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let references: i64 = row.get("cnt");
        if references > 0 {
            return Err(StoreError::Conflict(format!(
                "environment {} is referenced by a live cluster",
                id
            )));
        }
        let now = Utc::now();
        sqlx::query("UPDATE environments SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_environments(&self) -> Result<Vec<Environment>> {
        let rows = sqlx::query("SELECT * FROM environments WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_environment).collect()
    }
}
