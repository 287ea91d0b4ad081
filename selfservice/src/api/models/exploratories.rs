//! API request/response models for notebooks.

use super::computational::ComputationalResponse;
use super::{check_name, check_not_blank, into_result};
use crate::db::models::exploratories::{ClusterConfig, Exploratory, ResourceUrl};
use crate::db::models::libraries::Library;
use crate::db::models::scheduler::SchedulerJobData;
use crate::errors::Result;
use crate::services::exploratory::ExploratoryCreate;
use crate::status::UserInstanceStatus;
use crate::types::{CloudProvider, ExploratoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

/// Request body for creating a notebook.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExploratoryCreateRequest {
    #[schema(example = "data-science")]
    pub project: String,
    #[schema(example = "local")]
    pub endpoint: String,
    #[schema(example = "my-notebook")]
    pub name: String,
    #[schema(example = "Jupyter notebook 6.1.6")]
    pub template_name: String,
    #[schema(example = "docker.datalab-jupyter")]
    pub image: String,
    #[schema(example = "t2.medium")]
    pub shape: String,
    /// Extra tags put on the cloud resources
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Spark configuration applied to the notebook's local kernel
    #[serde(default)]
    pub cluster_config: Vec<ClusterConfig>,
}

impl ExploratoryCreateRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_name(&mut errors, "name", &self.name);
        check_not_blank(&mut errors, "project", &self.project);
        check_not_blank(&mut errors, "endpoint", &self.endpoint);
        check_not_blank(&mut errors, "image", &self.image);
        check_not_blank(&mut errors, "shape", &self.shape);
        into_result(errors)
    }
}

impl From<ExploratoryCreateRequest> for ExploratoryCreate {
    fn from(request: ExploratoryCreateRequest) -> Self {
        Self {
            project: request.project,
            endpoint: request.endpoint,
            name: request.name,
            template_name: request.template_name,
            image: request.image,
            shape: request.shape,
            tags: request.tags,
            cluster_config: request.cluster_config,
        }
    }
}

/// Identifies one of the caller's notebooks.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExploratoryActionRequest {
    pub project: String,
    pub name: String,
}

/// Request body for replacing a notebook's Spark configuration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExploratoryReconfigureRequest {
    pub project: String,
    pub name: String,
    pub config: Vec<ClusterConfig>,
}

/// Request body for saving a notebook as a machine image.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImageCreateRequest {
    #[schema(example = "my-image")]
    pub name: String,
    pub description: Option<String>,
}

impl ImageCreateRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_name(&mut errors, "name", &self.name);
        into_result(errors)
    }
}

/// Query parameters for listing the caller's notebooks
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListExploratoriesQuery {
    /// Only notebooks in this project
    pub project: Option<String>,
}

/// A notebook with its clusters.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExploratoryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ExploratoryId,
    pub user: String,
    pub project: String,
    pub endpoint: String,
    pub exploratory_name: String,
    pub template_name: String,
    pub image: String,
    pub shape: String,
    pub cloud_provider: CloudProvider,
    pub status: UserInstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    pub exploratory_url: Vec<ResourceUrl>,
    pub tags: BTreeMap<String, String>,
    pub cluster_config: Vec<ClusterConfig>,
    pub libs: Vec<Library>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_data: Option<SchedulerJobData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub computational_resources: Vec<ComputationalResponse>,
}

impl From<Exploratory> for ExploratoryResponse {
    fn from(db: Exploratory) -> Self {
        Self {
            id: db.id,
            user: db.user,
            project: db.project,
            endpoint: db.endpoint,
            exploratory_name: db.exploratory_name,
            template_name: db.template_name,
            image: db.image,
            shape: db.shape,
            cloud_provider: db.cloud_provider,
            status: db.status,
            instance_id: db.instance_id,
            private_ip: db.private_ip,
            exploratory_url: db.exploratory_url,
            tags: db.tags,
            cluster_config: db.cluster_config,
            libs: db.libs,
            scheduler_data: db.scheduler_data,
            error_message: db.error_message,
            last_activity: db.last_activity,
            created_at: db.created_at,
            updated_at: db.updated_at,
            computational_resources: db.computational_resources.into_iter().map(Into::into).collect(),
        }
    }
}
