//! Tagging taxonomy and the environment registry.
//!
//! Tags are shared key/value labels, never owned by a single cluster or
//! application. The join rows carry an attach timestamp (which gives the
//! insertion order that tag listings preserve) and their own soft-delete
//! marker so the cluster delete cascade can retire them without losing
//! history.

use super::{EnvironmentName, RecordMeta};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A key/value label attachable to clusters or applications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub meta: RecordMeta,
    pub key: String,
    pub value: String,
}

/// Creation input for [`Tag`].
///
/// The (key, value) pair is unique among live tags; the key alone is not
/// globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagSpec {
    pub key: String,
    pub value: String,
}

impl TagSpec {
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(StoreError::Validation(
                "tag key must not be empty".to_string(),
            ));
        }
        if self.value.is_empty() {
            return Err(StoreError::Validation(
                "tag value must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_entity(self, meta: RecordMeta) -> Tag {
        Tag {
            meta,
            key: self.key,
            value: self.value,
        }
    }
}

/// Join row linking a tag to a cluster, keyed by (cluster_id, tag_id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterTag {
    pub cluster_id: i64,
    pub tag_id: i64,
    pub attached_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Join row linking a tag to an application, keyed by (application_id, tag_id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationTag {
    pub application_id: i64,
    pub tag_id: i64,
    pub attached_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A deployment-stage classification referenced by clusters.
///
/// The registry is a fixed small set: one row per [`EnvironmentName`],
/// unique by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub meta: RecordMeta,
    pub name: EnvironmentName,
}
