//! API request/response models for clusters attached to notebooks.

use super::{check_name, check_not_blank, into_result};
use crate::db::models::computational::ComputationalResource;
use crate::db::models::exploratories::{ClusterConfig, ResourceUrl};
use crate::db::models::libraries::Library;
use crate::db::models::scheduler::SchedulerJobData;
use crate::errors::Result;
use crate::services::computational::ComputationalCreate;
use crate::status::UserInstanceStatus;
use crate::types::{ComputationalId, ComputationalKind, ExploratoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for creating a standalone Spark cluster.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SparkClusterCreateRequest {
    pub project: String,
    /// Notebook the cluster is attached to
    pub exploratory_name: String,
    #[schema(example = "spark")]
    pub name: String,
    #[schema(example = "docker.datalab-dataengine")]
    pub image: String,
    /// Shape of every node
    #[schema(example = "c4.xlarge")]
    pub shape: String,
    /// Master plus workers
    #[schema(example = 2, minimum = 1)]
    pub instance_count: i32,
    #[serde(default)]
    pub config: Vec<ClusterConfig>,
}

impl SparkClusterCreateRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_name(&mut errors, "name", &self.name);
        check_not_blank(&mut errors, "project", &self.project);
        check_not_blank(&mut errors, "exploratory_name", &self.exploratory_name);
        check_not_blank(&mut errors, "image", &self.image);
        check_not_blank(&mut errors, "shape", &self.shape);
        if self.instance_count < 1 {
            errors.push("instance_count must be at least 1".to_string());
        }
        into_result(errors)
    }
}

impl From<SparkClusterCreateRequest> for ComputationalCreate {
    fn from(request: SparkClusterCreateRequest) -> Self {
        Self {
            project: request.project,
            exploratory_name: request.exploratory_name,
            name: request.name,
            kind: ComputationalKind::Spark,
            image: request.image,
            slave_shape: Some(request.shape.clone()),
            master_shape: request.shape,
            instance_count: request.instance_count,
            version: None,
            config: request.config,
        }
    }
}

/// Request body for creating a cloud managed cluster (EMR, Dataproc, HDInsight).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CloudClusterCreateRequest {
    pub project: String,
    pub exploratory_name: String,
    #[schema(example = "emr")]
    pub name: String,
    #[schema(example = "docker.datalab-dataengine-service")]
    pub image: String,
    #[schema(example = "m5.xlarge")]
    pub master_shape: String,
    #[schema(example = "m5.xlarge")]
    pub slave_shape: String,
    #[schema(example = 3, minimum = 1)]
    pub instance_count: i32,
    /// Release of the managed service, e.g. `emr-6.2.0`
    pub version: Option<String>,
    #[serde(default)]
    pub config: Vec<ClusterConfig>,
}

impl CloudClusterCreateRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_name(&mut errors, "name", &self.name);
        check_not_blank(&mut errors, "project", &self.project);
        check_not_blank(&mut errors, "exploratory_name", &self.exploratory_name);
        check_not_blank(&mut errors, "image", &self.image);
        check_not_blank(&mut errors, "master_shape", &self.master_shape);
        check_not_blank(&mut errors, "slave_shape", &self.slave_shape);
        if self.instance_count < 1 {
            errors.push("instance_count must be at least 1".to_string());
        }
        into_result(errors)
    }
}

impl From<CloudClusterCreateRequest> for ComputationalCreate {
    fn from(request: CloudClusterCreateRequest) -> Self {
        Self {
            project: request.project,
            exploratory_name: request.exploratory_name,
            name: request.name,
            kind: ComputationalKind::CloudService,
            image: request.image,
            master_shape: request.master_shape,
            slave_shape: Some(request.slave_shape),
            instance_count: request.instance_count,
            version: request.version,
            config: request.config,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComputationalResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ComputationalId,
    #[schema(value_type = String, format = "uuid")]
    pub exploratory_id: ExploratoryId,
    pub computational_name: String,
    pub resource_type: ComputationalKind,
    pub image: String,
    pub status: UserInstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub master_shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slave_shape: Option<String>,
    pub total_instance_number: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub resource_url: Vec<ResourceUrl>,
    pub config: Vec<ClusterConfig>,
    pub libs: Vec<Library>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_data: Option<SchedulerJobData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ComputationalResource> for ComputationalResponse {
    fn from(db: ComputationalResource) -> Self {
        Self {
            id: db.id,
            exploratory_id: db.exploratory_id,
            computational_name: db.computational_name,
            resource_type: db.resource_type,
            image: db.image,
            status: db.status,
            instance_id: db.instance_id,
            master_shape: db.master_shape,
            slave_shape: db.slave_shape,
            total_instance_number: db.total_instance_number,
            version: db.version,
            resource_url: db.resource_url,
            config: db.config,
            libs: db.libs,
            scheduler_data: db.scheduler_data,
            error_message: db.error_message,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
