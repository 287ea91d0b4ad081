//! Paths on the provisioning service, relative to an endpoint's base URL.

pub const EXPLORATORY_CREATE: &str = "infrastructure_provision/exploratory_environment/create";
pub const EXPLORATORY_START: &str = "infrastructure_provision/exploratory_environment/start";
pub const EXPLORATORY_STOP: &str = "infrastructure_provision/exploratory_environment/stop";
pub const EXPLORATORY_TERMINATE: &str = "infrastructure_provision/exploratory_environment/terminate";
pub const EXPLORATORY_RECONFIGURE_SPARK: &str = "infrastructure_provision/exploratory_environment/reconfigure_spark";
pub const EXPLORATORY_IMAGE: &str = "infrastructure_provision/exploratory_image";

pub const SPARK_CREATE: &str = "infrastructure_provision/computational_resources/dataengine/create";
pub const SPARK_START: &str = "infrastructure_provision/computational_resources/dataengine/start";
pub const SPARK_STOP: &str = "infrastructure_provision/computational_resources/dataengine/stop";
pub const SPARK_TERMINATE: &str = "infrastructure_provision/computational_resources/dataengine/terminate";
pub const SPARK_RECONFIGURE: &str = "infrastructure_provision/computational_resources/dataengine/reconfigure";
pub const CLOUD_CLUSTER_CREATE: &str = "infrastructure_provision/computational_resources/dataengine-service/create";
pub const CLOUD_CLUSTER_TERMINATE: &str = "infrastructure_provision/computational_resources/dataengine-service/terminate";

pub const EXPLORATORY_LIB_INSTALL: &str = "library/exploratory/lib_install";
pub const COMPUTATIONAL_LIB_INSTALL: &str = "library/computational/lib_install";

pub const PROJECT_CREATE: &str = "infrastructure/project/create";
pub const PROJECT_START: &str = "infrastructure/project/start";
pub const PROJECT_STOP: &str = "infrastructure/project/stop";
pub const PROJECT_TERMINATE: &str = "infrastructure/project/terminate";

pub const BACKUP: &str = "infrastructure/backup";
pub const STATUS_CHECK: &str = "infrastructure/status";
pub const HEALTH_CHECK: &str = "infrastructure";
pub const BILLING: &str = "billing";
