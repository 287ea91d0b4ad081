//! Action documents sent to the provisioning service.
//!
//! Field names follow the provisioning service's wire format. Every resource document carries
//! a [`ResourceBaseDto`] identifying the installation, the acting user and where the resource
//! lives.

use crate::config::ProvisioningConfig;
use crate::db::models::backups::BackupRequest;
use crate::db::models::computational::ComputationalResource;
use crate::db::models::exploratories::{ClusterConfig, Exploratory};
use crate::db::models::libraries::Library;
use crate::db::models::projects::Project;
use crate::types::{BackupId, CloudProvider};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceBaseDto {
    pub conf_service_base_name: String,
    pub conf_os_family: String,
    pub cloud_provider: CloudProvider,
    pub edge_user_name: String,
    pub project_name: String,
    pub endpoint_name: String,
    /// Cost allocation tag; billing rows refer back to the resource through it
    pub datalab_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExploratoryCreateDto {
    #[serde(flatten)]
    pub base: ResourceBaseDto,
    pub exploratory_name: String,
    pub notebook_image: String,
    pub notebook_instance_type: String,
    pub template_name: String,
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cluster_config: Vec<ClusterConfig>,
    pub shared_image_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExploratoryActionDto {
    #[serde(flatten)]
    pub base: ResourceBaseDto,
    pub exploratory_name: String,
    pub notebook_image: String,
    pub notebook_instance_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExploratoryReconfigureDto {
    #[serde(flatten)]
    pub action: ExploratoryActionDto,
    pub spark_configurations: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExploratoryImageDto {
    #[serde(flatten)]
    pub action: ExploratoryActionDto,
    pub image_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SparkClusterCreateDto {
    #[serde(flatten)]
    pub base: ResourceBaseDto,
    pub exploratory_name: String,
    pub computational_name: String,
    pub notebook_instance_name: Option<String>,
    pub image: String,
    pub dataengine_instance_count: i32,
    pub dataengine_instance_shape: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spark_configurations: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudClusterCreateDto {
    #[serde(flatten)]
    pub base: ResourceBaseDto,
    pub exploratory_name: String,
    pub computational_name: String,
    pub notebook_instance_name: Option<String>,
    pub image: String,
    pub master_instance_type: String,
    pub slave_instance_type: Option<String>,
    pub instance_count: i32,
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputationalActionDto {
    #[serde(flatten)]
    pub base: ResourceBaseDto,
    pub exploratory_name: String,
    pub computational_name: String,
    pub notebook_instance_name: Option<String>,
    pub computational_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputationalReconfigureDto {
    #[serde(flatten)]
    pub action: ComputationalActionDto,
    pub spark_configurations: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryInstallDto {
    #[serde(flatten)]
    pub base: ResourceBaseDto,
    pub exploratory_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computational_name: Option<String>,
    pub notebook_instance_name: Option<String>,
    pub libs: Vec<Library>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectActionDto {
    pub conf_service_base_name: String,
    pub conf_os_family: String,
    pub cloud_provider: CloudProvider,
    pub project_name: String,
    pub endpoint_name: String,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub groups: BTreeSet<String>,
    pub shared_image_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupDto {
    pub id: BackupId,
    #[serde(flatten)]
    pub request: BackupRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCheckResource {
    pub instance_id: String,
    pub resource_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCheckDto {
    pub conf_service_base_name: String,
    pub cloud_provider: CloudProvider,
    pub endpoint_name: String,
    pub resources: Vec<StatusCheckResource>,
}

/// Builds the action documents from stored records and installation settings.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    service_base_name: String,
    os_family: String,
}

impl RequestBuilder {
    pub fn new(config: &ProvisioningConfig) -> Self {
        Self {
            service_base_name: config.service_base_name.clone(),
            os_family: config.os_family.clone(),
        }
    }

    /// Cost allocation tag of a notebook.
    pub fn exploratory_tag(&self, exploratory: &Exploratory) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.service_base_name, exploratory.project, exploratory.endpoint, exploratory.user, exploratory.exploratory_name
        )
    }

    /// Cost allocation tag of a cluster.
    pub fn computational_tag(&self, exploratory: &Exploratory, computational_name: &str) -> String {
        format!("{}-{}", self.exploratory_tag(exploratory), computational_name)
    }

    /// Cost allocation tag of a project's edge node on one endpoint.
    pub fn edge_tag(&self, project: &str, endpoint: &str) -> String {
        format!("{}-{}-{}-edge", self.service_base_name, project, endpoint)
    }

    fn base(&self, exploratory: &Exploratory, datalab_id: String) -> ResourceBaseDto {
        ResourceBaseDto {
            conf_service_base_name: self.service_base_name.clone(),
            conf_os_family: self.os_family.clone(),
            cloud_provider: exploratory.cloud_provider,
            edge_user_name: exploratory.user.clone(),
            project_name: exploratory.project.clone(),
            endpoint_name: exploratory.endpoint.clone(),
            datalab_id,
        }
    }

    pub fn exploratory_create(&self, exploratory: &Exploratory, shared_image_enabled: bool) -> ExploratoryCreateDto {
        ExploratoryCreateDto {
            base: self.base(exploratory, self.exploratory_tag(exploratory)),
            exploratory_name: exploratory.exploratory_name.clone(),
            notebook_image: exploratory.image.clone(),
            notebook_instance_type: exploratory.shape.clone(),
            template_name: exploratory.template_name.clone(),
            tags: exploratory.tags.clone(),
            cluster_config: exploratory.cluster_config.clone(),
            shared_image_enabled,
        }
    }

    pub fn exploratory_action(&self, exploratory: &Exploratory) -> ExploratoryActionDto {
        ExploratoryActionDto {
            base: self.base(exploratory, self.exploratory_tag(exploratory)),
            exploratory_name: exploratory.exploratory_name.clone(),
            notebook_image: exploratory.image.clone(),
            notebook_instance_name: exploratory.instance_id.clone(),
        }
    }

    pub fn exploratory_reconfigure(&self, exploratory: &Exploratory, config: &[ClusterConfig]) -> ExploratoryReconfigureDto {
        ExploratoryReconfigureDto {
            action: self.exploratory_action(exploratory),
            spark_configurations: config.to_vec(),
        }
    }

    pub fn exploratory_image(&self, exploratory: &Exploratory, image_name: &str, description: Option<&str>) -> ExploratoryImageDto {
        ExploratoryImageDto {
            action: self.exploratory_action(exploratory),
            image_name: image_name.to_string(),
            description: description.map(str::to_string),
        }
    }

    pub fn spark_cluster_create(&self, exploratory: &Exploratory, cluster: &ComputationalResource) -> SparkClusterCreateDto {
        SparkClusterCreateDto {
            base: self.base(exploratory, self.computational_tag(exploratory, &cluster.computational_name)),
            exploratory_name: exploratory.exploratory_name.clone(),
            computational_name: cluster.computational_name.clone(),
            notebook_instance_name: exploratory.instance_id.clone(),
            image: cluster.image.clone(),
            dataengine_instance_count: cluster.total_instance_number,
            dataengine_instance_shape: cluster.master_shape.clone(),
            spark_configurations: cluster.config.clone(),
        }
    }

    pub fn cloud_cluster_create(&self, exploratory: &Exploratory, cluster: &ComputationalResource) -> CloudClusterCreateDto {
        CloudClusterCreateDto {
            base: self.base(exploratory, self.computational_tag(exploratory, &cluster.computational_name)),
            exploratory_name: exploratory.exploratory_name.clone(),
            computational_name: cluster.computational_name.clone(),
            notebook_instance_name: exploratory.instance_id.clone(),
            image: cluster.image.clone(),
            master_instance_type: cluster.master_shape.clone(),
            slave_instance_type: cluster.slave_shape.clone(),
            instance_count: cluster.total_instance_number,
            version: cluster.version.clone(),
            configurations: cluster.config.clone(),
        }
    }

    pub fn computational_action(&self, exploratory: &Exploratory, cluster: &ComputationalResource) -> ComputationalActionDto {
        ComputationalActionDto {
            base: self.base(exploratory, self.computational_tag(exploratory, &cluster.computational_name)),
            exploratory_name: exploratory.exploratory_name.clone(),
            computational_name: cluster.computational_name.clone(),
            notebook_instance_name: exploratory.instance_id.clone(),
            computational_id: cluster.instance_id.clone(),
        }
    }

    pub fn computational_reconfigure(
        &self,
        exploratory: &Exploratory,
        cluster: &ComputationalResource,
        config: &[ClusterConfig],
    ) -> ComputationalReconfigureDto {
        ComputationalReconfigureDto {
            action: self.computational_action(exploratory, cluster),
            spark_configurations: config.to_vec(),
        }
    }

    pub fn library_install(&self, exploratory: &Exploratory, computational_name: Option<&str>, libs: &[Library]) -> LibraryInstallDto {
        let datalab_id = match computational_name {
            Some(name) => self.computational_tag(exploratory, name),
            None => self.exploratory_tag(exploratory),
        };
        LibraryInstallDto {
            base: self.base(exploratory, datalab_id),
            exploratory_name: exploratory.exploratory_name.clone(),
            computational_name: computational_name.map(str::to_string),
            notebook_instance_name: exploratory.instance_id.clone(),
            libs: libs.to_vec(),
        }
    }

    pub fn project_action(&self, project: &Project, endpoint: &str, cloud_provider: CloudProvider) -> ProjectActionDto {
        ProjectActionDto {
            conf_service_base_name: self.service_base_name.clone(),
            conf_os_family: self.os_family.clone(),
            cloud_provider,
            project_name: project.name.clone(),
            endpoint_name: endpoint.to_string(),
            groups: project.groups.clone(),
            shared_image_enabled: project.shared_image_enabled,
        }
    }

    pub fn backup(&self, id: BackupId, request: &BackupRequest) -> BackupDto {
        BackupDto {
            id,
            request: request.clone(),
        }
    }

    pub fn status_check(&self, endpoint: &str, cloud_provider: CloudProvider, resources: Vec<StatusCheckResource>) -> StatusCheckDto {
        StatusCheckDto {
            conf_service_base_name: self.service_base_name.clone(),
            cloud_provider,
            endpoint_name: endpoint.to_string(),
            resources,
        }
    }
}
