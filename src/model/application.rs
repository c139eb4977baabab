//! GitOps application bindings deployed to a cluster.

use super::RecordMeta;
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// An Argo CD application bound to exactly one cluster.
///
/// (name, namespace) is unique among the live applications of a cluster.
/// The sync policy is opaque text; its internal shape is the caller's
/// concern, not this store's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArgoCdApplication {
    pub meta: RecordMeta,
    pub cluster_id: i64,
    pub name: String,
    pub namespace: String,
    pub repo_url: String,
    pub path: String,
    pub target_revision: String,
    pub project: String,
    pub sync_policy: String,
}

/// Creation/update input for [`ArgoCdApplication`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArgoCdApplicationSpec {
    pub cluster_id: i64,
    pub name: String,
    pub namespace: String,
    pub repo_url: String,
    pub path: String,
    pub target_revision: String,
    pub project: String,
    pub sync_policy: String,
}

impl ArgoCdApplicationSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Validation(
                "application name must not be empty".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(StoreError::Validation(
                "application namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_entity(self, meta: RecordMeta) -> ArgoCdApplication {
        ArgoCdApplication {
            meta,
            cluster_id: self.cluster_id,
            name: self.name,
            namespace: self.namespace,
            repo_url: self.repo_url,
            path: self.path,
            target_revision: self.target_revision,
            project: self.project,
            sync_policy: self.sync_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_requires_name_and_namespace() {
        let spec = ArgoCdApplicationSpec {
            cluster_id: 1,
            name: "app1".to_string(),
            namespace: String::new(),
            repo_url: "https://git.example.com/apps.git".to_string(),
            path: "apps/app1".to_string(),
            target_revision: "HEAD".to_string(),
            project: "default".to_string(),
            sync_policy: String::new(),
        };
        assert!(matches!(spec.validate(), Err(StoreError::Validation(_))));
    }
}
