//! Common type definitions shared by every layer.
//!
//! # ID Types
//!
//! Stored records are identified by UUIDs wrapped in type aliases:
//!
//! - [`ExploratoryId`]: notebook (exploratory) record identifier
//! - [`ComputationalId`]: cluster record identifier
//! - [`BackupId`]: backup request identifier
//! - [`RequestUuid`]: correlation id returned by the provisioning service
//!
//! # Resource Keys
//!
//! User facing operations address resources by name rather than by id. A notebook is
//! unique per `(user, project, exploratory_name)` and a cluster is unique per
//! notebook and `computational_name`; [`ExploratoryKey`] and [`ComputationalKey`]
//! carry those tuples through the service layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type ExploratoryId = Uuid;
pub type ComputationalId = Uuid;
pub type BackupId = Uuid;
pub type AuditId = Uuid;
pub type RequestUuid = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Identifies a notebook by owner, project and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExploratoryKey {
    pub user: String,
    pub project: String,
    pub exploratory_name: String,
}

impl ExploratoryKey {
    pub fn new(user: impl Into<String>, project: impl Into<String>, exploratory_name: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            project: project.into(),
            exploratory_name: exploratory_name.into(),
        }
    }

    pub fn computational(&self, computational_name: impl Into<String>) -> ComputationalKey {
        ComputationalKey {
            exploratory: self.clone(),
            computational_name: computational_name.into(),
        }
    }
}

impl fmt::Display for ExploratoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user, self.project, self.exploratory_name)
    }
}

/// Identifies a cluster attached to a notebook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputationalKey {
    pub exploratory: ExploratoryKey,
    pub computational_name: String,
}

impl fmt::Display for ComputationalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exploratory, self.computational_name)
    }
}

/// Cloud a registered endpoint provisions against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Azure => "azure",
        }
    }

    pub fn from_db_string(s: &str) -> Option<CloudProvider> {
        match s {
            "aws" => Some(CloudProvider::Aws),
            "gcp" => Some(CloudProvider::Gcp),
            "azure" => Some(CloudProvider::Azure),
            _ => None,
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of cluster attached to a notebook.
///
/// `dataengine` is a standalone Spark cluster that can be stopped and started again;
/// `dataengine-service` is a cloud managed cluster (EMR, Dataproc, HDInsight) which can
/// only be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ComputationalKind {
    #[serde(rename = "dataengine")]
    Spark,
    #[serde(rename = "dataengine-service")]
    CloudService,
}

impl ComputationalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputationalKind::Spark => "dataengine",
            ComputationalKind::CloudService => "dataengine-service",
        }
    }

    pub fn from_db_string(s: &str) -> Option<ComputationalKind> {
        match s {
            "dataengine" => Some(ComputationalKind::Spark),
            "dataengine-service" => Some(ComputationalKind::CloudService),
            _ => None,
        }
    }
}

impl fmt::Display for ComputationalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
