use crate::db::models::exploratories::{ClusterConfig, ResourceUrl};
use crate::db::models::libraries::Library;
use crate::db::models::scheduler::SchedulerJobData;
use crate::status::UserInstanceStatus;
use crate::types::{ComputationalId, ComputationalKind, ExploratoryId};
use chrono::{DateTime, Utc};

/// Database request for creating a cluster under a notebook
#[derive(Debug, Clone)]
pub struct ComputationalCreateDBRequest {
    pub computational_name: String,
    pub resource_type: ComputationalKind,
    pub image: String,
    pub master_shape: String,
    pub slave_shape: Option<String>,
    pub total_instance_number: i32,
    /// Cloud service version (EMR release, Dataproc image); unused for Spark clusters
    pub version: Option<String>,
    pub config: Vec<ClusterConfig>,
}

/// Partial update of the fields reported back by the provisioning service.
#[derive(Debug, Clone, Default)]
pub struct ComputationalFieldsUpdate {
    pub instance_id: Option<String>,
    pub resource_url: Option<Vec<ResourceUrl>>,
    pub error_message: Option<String>,
}

/// A cluster attached to a notebook
#[derive(Debug, Clone)]
pub struct ComputationalResource {
    pub id: ComputationalId,
    pub exploratory_id: ExploratoryId,
    pub computational_name: String,
    pub resource_type: ComputationalKind,
    pub image: String,
    pub status: UserInstanceStatus,
    pub instance_id: Option<String>,
    pub master_shape: String,
    pub slave_shape: Option<String>,
    pub total_instance_number: i32,
    pub version: Option<String>,
    pub resource_url: Vec<ResourceUrl>,
    pub config: Vec<ClusterConfig>,
    pub libs: Vec<Library>,
    pub scheduler_data: Option<SchedulerJobData>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
