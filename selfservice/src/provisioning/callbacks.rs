//! Documents the provisioning service posts back once an action finished.
//!
//! Statuses arrive as free text and are parsed by the receiving service, so an unknown status
//! can be rejected on a direct callback but skipped during reconciliation.

use crate::db::models::backups::BackupStatus;
use crate::db::models::exploratories::ResourceUrl;
use crate::db::models::projects::EdgeInfo;
use crate::types::{BackupId, RequestUuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExploratoryStatusCallback {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestUuid,
    pub user: String,
    pub project: String,
    pub exploratory_name: String,
    pub status: String,
    pub instance_id: Option<String>,
    pub private_ip: Option<String>,
    #[serde(default)]
    pub exploratory_url: Option<Vec<ResourceUrl>>,
    pub error_message: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComputationalStatusCallback {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestUuid,
    pub user: String,
    pub project: String,
    pub exploratory_name: String,
    pub computational_name: String,
    pub status: String,
    pub instance_id: Option<String>,
    #[serde(default)]
    pub resource_url: Option<Vec<ResourceUrl>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LibraryStatus {
    pub group: String,
    pub name: String,
    pub version: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    #[serde(default)]
    pub add_deps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LibraryStatusCallback {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestUuid,
    pub user: String,
    pub project: String,
    pub exploratory_name: String,
    pub computational_name: Option<String>,
    pub libs: Vec<LibraryStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectStatusCallback {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestUuid,
    pub project: String,
    pub endpoint: String,
    pub status: String,
    pub edge_info: Option<EdgeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BackupStatusCallback {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestUuid,
    #[schema(value_type = String, format = "uuid")]
    pub id: BackupId,
    pub status: BackupStatus,
    pub file_name: Option<String>,
    pub error_message: Option<String>,
}

/// Status of one cloud instance as observed by the provisioning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ObservedStatus {
    pub instance_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentStatusCallback {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestUuid,
    pub endpoint: String,
    pub resources: Vec<ObservedStatus>,
}
