//! Cluster lifecycle.
//!
//! Spark clusters (`dataengine`) can be stopped and started again; cloud clusters
//! (`dataengine-service`) can only be created and terminated. Every action requires the parent
//! notebook to be RUNNING, except terminate.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::{ComputationalDao, ExploratoryDao};
use crate::db::models::audit::{AuditAction, AuditResourceType};
use crate::db::models::computational::{ComputationalCreateDBRequest, ComputationalFieldsUpdate, ComputationalResource};
use crate::db::models::exploratories::{ClusterConfig, Exploratory};
use crate::errors::{Error, Result};
use crate::provisioning::callbacks::ComputationalStatusCallback;
use crate::provisioning::paths;
use crate::services::Dispatcher;
use crate::services::audit::AuditService;
use crate::services::billing::BillingService;
use crate::status::{ResourceAction, Transition, UserInstanceStatus};
use crate::types::{ComputationalKey, ComputationalKind, ExploratoryKey, RequestUuid};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Request to create a cluster attached to a notebook.
#[derive(Debug, Clone)]
pub struct ComputationalCreate {
    pub project: String,
    pub exploratory_name: String,
    pub name: String,
    pub kind: ComputationalKind,
    pub image: String,
    pub master_shape: String,
    pub slave_shape: Option<String>,
    pub instance_count: i32,
    pub version: Option<String>,
    pub config: Vec<ClusterConfig>,
}

#[derive(Clone)]
pub struct ComputationalService {
    exploratories: Arc<dyn ExploratoryDao>,
    computational: Arc<dyn ComputationalDao>,
    dispatcher: Dispatcher,
    audit: AuditService,
    billing: BillingService,
}

fn require_running_parent(parent: &Exploratory, action: &str) -> Result<()> {
    if parent.status != UserInstanceStatus::Running {
        return Err(Error::ResourceInappropriateState {
            message: format!(
                "Cannot {action} a cluster of notebook {} with status {}",
                parent.exploratory_name, parent.status
            ),
        });
    }
    Ok(())
}

fn require_spark(cluster: &ComputationalResource, action: &str) -> Result<()> {
    if cluster.resource_type != ComputationalKind::Spark {
        return Err(Error::bad_request(format!(
            "Cannot {action} cluster {}: only Spark clusters support this action",
            cluster.computational_name
        )));
    }
    Ok(())
}

impl ComputationalService {
    pub fn new(store: &Store, dispatcher: Dispatcher, audit: AuditService, billing: BillingService) -> Self {
        Self {
            exploratories: store.exploratories.clone(),
            computational: store.computational.clone(),
            dispatcher,
            audit,
            billing,
        }
    }

    /// Parent notebook and cluster by key; 404 when either is unknown.
    pub async fn get(&self, key: &ComputationalKey) -> Result<(Exploratory, ComputationalResource)> {
        let parent = self
            .exploratories
            .find(&key.exploratory)
            .await?
            .ok_or_else(|| Error::not_found("Notebook", &key.exploratory))?;
        let cluster = parent
            .computational(&key.computational_name)
            .cloned()
            .ok_or_else(|| Error::not_found("Cluster", key))?;
        Ok((parent, cluster))
    }

    async fn mark_failed(&self, cluster: &ComputationalResource, error: &Error) {
        let update = ComputationalFieldsUpdate {
            error_message: Some(error.to_string()),
            ..Default::default()
        };
        let result = async {
            self.computational.update_status(cluster.id, UserInstanceStatus::Failed).await?;
            self.computational.update_fields(cluster.id, &update).await
        }
        .await;
        if let Err(e) = result {
            warn!(cluster = %cluster.computational_name, "Could not mark cluster failed: {e}");
        }
    }

    async fn dispatch(
        &self,
        parent: &Exploratory,
        cluster: &ComputationalResource,
        path: &str,
        user: &CurrentUser,
        body: &impl serde::Serialize,
        operation: &str,
    ) -> Result<RequestUuid> {
        match self.dispatcher.send(&parent.endpoint, path, user, body, operation).await {
            Ok(request_id) => Ok(request_id),
            Err(e) => {
                self.mark_failed(cluster, &e).await;
                Err(e)
            }
        }
    }

    async fn audit(&self, user: &CurrentUser, action: AuditAction, parent: &Exploratory, cluster: &ComputationalResource) {
        self.audit
            .record(
                &user.name,
                action,
                Some(&parent.project),
                &cluster.computational_name,
                AuditResourceType::Computational,
                Some(format!("notebook {}", parent.exploratory_name)),
            )
            .await;
    }

    /// Create a Spark or cloud cluster on a running notebook.
    #[instrument(skip(self, user, request), fields(user = %user.name, name = %request.name, kind = %request.kind), err)]
    pub async fn create(&self, user: &CurrentUser, request: ComputationalCreate) -> Result<RequestUuid> {
        let parent_key = ExploratoryKey::new(&user.name, &request.project, &request.exploratory_name);
        let parent = self
            .exploratories
            .find(&parent_key)
            .await?
            .ok_or_else(|| Error::not_found("Notebook", &parent_key))?;
        require_running_parent(&parent, "create")?;
        self.billing.check_quota(&parent.project).await?;

        let db_request = ComputationalCreateDBRequest {
            computational_name: request.name,
            resource_type: request.kind,
            image: request.image,
            master_shape: request.master_shape,
            slave_shape: request.slave_shape,
            total_instance_number: request.instance_count,
            version: request.version,
            config: request.config,
        };
        let cluster = match parent.computational(&db_request.computational_name) {
            Some(existing) => {
                existing
                    .status
                    .transition(ResourceAction::Create)
                    .map_err(|_| Error::conflict(format!("Cluster {} already exists", db_request.computational_name)))?;
                self.computational.recreate(existing.id, &db_request).await?
            }
            None => self.computational.insert(parent.id, &db_request).await?,
        };

        let builder = &self.dispatcher.builder;
        let request_id = match cluster.resource_type {
            ComputationalKind::Spark => {
                let body = builder.spark_cluster_create(&parent, &cluster);
                self.dispatch(&parent, &cluster, paths::SPARK_CREATE, user, &body, "create cluster")
                    .await?
            }
            ComputationalKind::CloudService => {
                let body = builder.cloud_cluster_create(&parent, &cluster);
                self.dispatch(&parent, &cluster, paths::CLOUD_CLUSTER_CREATE, user, &body, "create cluster")
                    .await?
            }
        };
        self.audit(user, AuditAction::Create, &parent, &cluster).await;
        Ok(request_id)
    }

    fn next_status(cluster: &ComputationalResource, action: ResourceAction) -> Result<Option<UserInstanceStatus>> {
        match cluster.status.transition(action)? {
            Transition::To(status) => Ok(Some(status)),
            Transition::NoOp => Ok(None),
        }
    }

    #[instrument(skip(self, user), fields(user = %user.name, cluster = %key), err)]
    pub async fn start(&self, user: &CurrentUser, key: &ComputationalKey) -> Result<RequestUuid> {
        let (parent, cluster) = self.get(key).await?;
        require_spark(&cluster, "start")?;
        require_running_parent(&parent, "start")?;
        let Some(status) = Self::next_status(&cluster, ResourceAction::Start)? else {
            return Err(Error::conflict(format!("Cluster {} is already starting", cluster.computational_name)));
        };
        self.billing.check_quota(&parent.project).await?;

        self.computational.update_status(cluster.id, status).await?;
        let body = self.dispatcher.builder.computational_action(&parent, &cluster);
        let request_id = self
            .dispatch(&parent, &cluster, paths::SPARK_START, user, &body, "start cluster")
            .await?;
        self.audit(user, AuditAction::Start, &parent, &cluster).await;
        Ok(request_id)
    }

    #[instrument(skip(self, user), fields(user = %user.name, cluster = %key), err)]
    pub async fn stop(&self, user: &CurrentUser, key: &ComputationalKey) -> Result<RequestUuid> {
        let (parent, cluster) = self.get(key).await?;
        require_spark(&cluster, "stop")?;
        let Some(status) = Self::next_status(&cluster, ResourceAction::Stop)? else {
            return Err(Error::conflict(format!("Cluster {} is already stopping", cluster.computational_name)));
        };

        self.computational.update_status(cluster.id, status).await?;
        let body = self.dispatcher.builder.computational_action(&parent, &cluster);
        let request_id = self
            .dispatch(&parent, &cluster, paths::SPARK_STOP, user, &body, "stop cluster")
            .await?;
        self.audit(user, AuditAction::Stop, &parent, &cluster).await;
        Ok(request_id)
    }

    /// Terminate a cluster; does nothing for a cluster already terminating or terminated.
    #[instrument(skip(self, user), fields(user = %user.name, cluster = %key), err)]
    pub async fn terminate(&self, user: &CurrentUser, key: &ComputationalKey) -> Result<Option<RequestUuid>> {
        let (parent, cluster) = self.get(key).await?;
        let Some(status) = Self::next_status(&cluster, ResourceAction::Terminate)? else {
            return Ok(None);
        };

        self.computational.update_status(cluster.id, status).await?;
        let body = self.dispatcher.builder.computational_action(&parent, &cluster);
        let path = match cluster.resource_type {
            ComputationalKind::Spark => paths::SPARK_TERMINATE,
            ComputationalKind::CloudService => paths::CLOUD_CLUSTER_TERMINATE,
        };
        let request_id = self
            .dispatch(&parent, &cluster, path, user, &body, "terminate cluster")
            .await?;
        self.audit(user, AuditAction::Terminate, &parent, &cluster).await;
        Ok(Some(request_id))
    }

    /// Replace the Spark configuration of a running Spark cluster.
    #[instrument(skip(self, user, config), fields(user = %user.name, cluster = %key), err)]
    pub async fn reconfigure(&self, user: &CurrentUser, key: &ComputationalKey, config: Vec<ClusterConfig>) -> Result<RequestUuid> {
        let (parent, cluster) = self.get(key).await?;
        require_spark(&cluster, "reconfigure")?;
        require_running_parent(&parent, "reconfigure")?;
        let Some(status) = Self::next_status(&cluster, ResourceAction::Reconfigure)? else {
            return Err(Error::conflict(format!("Cluster {} is already reconfiguring", cluster.computational_name)));
        };

        self.computational.update_config(cluster.id, &config).await?;
        self.computational.update_status(cluster.id, status).await?;
        let body = self.dispatcher.builder.computational_reconfigure(&parent, &cluster, &config);
        let request_id = self
            .dispatch(&parent, &cluster, paths::SPARK_RECONFIGURE, user, &body, "reconfigure cluster")
            .await?;
        self.audit(user, AuditAction::Reconfigure, &parent, &cluster).await;
        Ok(request_id)
    }

    #[instrument(skip(self, callback), fields(user = %callback.user, cluster = %callback.computational_name, status = %callback.status), err)]
    pub async fn update_status_from_callback(&self, callback: ComputationalStatusCallback) -> Result<ComputationalResource> {
        let status = UserInstanceStatus::parse(&callback.status)
            .ok_or_else(|| Error::bad_request(format!("Unknown status '{}'", callback.status)))?;
        self.dispatcher.registry.check_and_remove(callback.request_id).await?;
        let key = ExploratoryKey::new(&callback.user, &callback.project, &callback.exploratory_name).computational(&callback.computational_name);
        let (_, cluster) = self.get(&key).await?;

        let update = ComputationalFieldsUpdate {
            instance_id: callback.instance_id,
            resource_url: callback.resource_url,
            error_message: callback.error_message,
        };
        self.computational.update_fields(cluster.id, &update).await?;
        self.computational.update_status(cluster.id, status).await?;
        Ok(self.get(&key).await?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestEnv, spark_request};
    use uuid::Uuid;

    fn create_request(name: &str, kind: ComputationalKind) -> ComputationalCreate {
        ComputationalCreate {
            project: "ds".to_string(),
            exploratory_name: "nb".to_string(),
            name: name.to_string(),
            kind,
            image: kind.as_str().to_string(),
            master_shape: "m5.large".to_string(),
            slave_shape: Some("m5.large".to_string()),
            instance_count: 2,
            version: None,
            config: vec![],
        }
    }

    fn key(name: &str) -> ComputationalKey {
        ExploratoryKey::new("alice", "ds", "nb").computational(name)
    }

    #[tokio::test]
    async fn test_create_requires_running_parent() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        env.store.exploratories.update_status(nb.id, UserInstanceStatus::Stopped).await.unwrap();

        let err = env
            .services
            .computational
            .create(&env.user("alice"), create_request("spark", ComputationalKind::Spark))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceInappropriateState { .. }));
    }

    #[tokio::test]
    async fn test_create_dispatches_by_kind() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let user = env.user("alice");

        env.services
            .computational
            .create(&user, create_request("spark", ComputationalKind::Spark))
            .await
            .unwrap();
        env.services
            .computational
            .create(&user, create_request("emr", ComputationalKind::CloudService))
            .await
            .unwrap();

        assert_eq!(
            env.provisioning.paths(),
            vec![paths::SPARK_CREATE.to_string(), paths::CLOUD_CLUSTER_CREATE.to_string()]
        );
        let (_, cluster) = env.services.computational.get(&key("emr")).await.unwrap();
        assert_eq!(cluster.status, UserInstanceStatus::Creating);
        assert_eq!(cluster.total_instance_number, 2);
    }

    #[tokio::test]
    async fn test_duplicate_cluster_conflicts() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let user = env.user("alice");
        env.services
            .computational
            .create(&user, create_request("spark", ComputationalKind::Spark))
            .await
            .unwrap();

        let err = env
            .services
            .computational
            .create(&user, create_request("spark", ComputationalKind::Spark))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));
    }

    #[tokio::test]
    async fn test_cloud_cluster_cannot_stop() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        let cloud = env
            .store
            .computational
            .insert(
                nb.id,
                &ComputationalCreateDBRequest {
                    resource_type: ComputationalKind::CloudService,
                    ..spark_request("emr")
                },
            )
            .await
            .unwrap();
        env.store.computational.update_status(cloud.id, UserInstanceStatus::Running).await.unwrap();

        let err = env.services.computational.stop(&env.user("alice"), &key("emr")).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_start_and_stop_spark() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        let spark = env.store.computational.insert(nb.id, &spark_request("spark")).await.unwrap();
        env.store.computational.update_status(spark.id, UserInstanceStatus::Stopped).await.unwrap();
        let user = env.user("alice");

        // Stop is only valid from RUNNING
        let err = env.services.computational.stop(&user, &key("spark")).await.unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));

        env.services.computational.start(&user, &key("spark")).await.unwrap();
        let (_, cluster) = env.services.computational.get(&key("spark")).await.unwrap();
        assert_eq!(cluster.status, UserInstanceStatus::Starting);
    }

    #[tokio::test]
    async fn test_start_running_cluster_over_budget_conflicts() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        let spark = env.store.computational.insert(nb.id, &spark_request("spark")).await.unwrap();
        env.store.computational.update_status(spark.id, UserInstanceStatus::Running).await.unwrap();
        env.exhaust_budget().await;
        let user = env.user("alice");

        let err = env.services.computational.start(&user, &key("spark")).await.unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));

        env.store.computational.update_status(spark.id, UserInstanceStatus::Stopped).await.unwrap();
        let err = env.services.computational.start(&user, &key("spark")).await.unwrap_err();
        assert!(matches!(err, Error::QuotaReached { .. }));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        let spark = env.store.computational.insert(nb.id, &spark_request("spark")).await.unwrap();
        env.store.computational.update_status(spark.id, UserInstanceStatus::Terminating).await.unwrap();

        assert_eq!(env.services.computational.terminate(&env.user("alice"), &key("spark")).await.unwrap(), None);
        assert!(env.provisioning.paths().is_empty());
    }

    #[tokio::test]
    async fn test_callback_updates_cluster() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        env.store.computational.insert(nb.id, &spark_request("spark")).await.unwrap();
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("alice", request_id).await.unwrap();

        let cluster = env
            .services
            .computational
            .update_status_from_callback(ComputationalStatusCallback {
                request_id,
                user: "alice".to_string(),
                project: "ds".to_string(),
                exploratory_name: "nb".to_string(),
                computational_name: "spark".to_string(),
                status: "running".to_string(),
                instance_id: Some("j-42".to_string()),
                resource_url: None,
                error_message: None,
            })
            .await
            .unwrap();
        assert_eq!(cluster.status, UserInstanceStatus::Running);
        assert_eq!(cluster.instance_id.as_deref(), Some("j-42"));
    }
}
