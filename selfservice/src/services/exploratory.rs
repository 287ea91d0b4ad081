//! Notebook lifecycle.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::{ComputationalDao, ExploratoryDao, ProjectDao};
use crate::db::models::audit::{AuditAction, AuditResourceType};
use crate::db::models::exploratories::{ClusterConfig, Exploratory, ExploratoryCreateDBRequest, ExploratoryFieldsUpdate, ExploratoryFilter};
use crate::errors::{Error, Result};
use crate::provisioning::callbacks::ExploratoryStatusCallback;
use crate::provisioning::paths;
use crate::services::audit::AuditService;
use crate::services::billing::BillingService;
use crate::services::{Dispatcher, check_membership};
use crate::status::{
    ResourceAction, STOP_CASCADE_EXCLUDED, TERMINATE_CASCADE_EXCLUDED, Transition, UserInstanceStatus, child_status_on_parent_stop,
};
use crate::types::{ComputationalKind, ExploratoryKey, RequestUuid};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Request to create a notebook.
#[derive(Debug, Clone)]
pub struct ExploratoryCreate {
    pub project: String,
    pub endpoint: String,
    pub name: String,
    pub template_name: String,
    pub image: String,
    pub shape: String,
    pub tags: BTreeMap<String, String>,
    pub cluster_config: Vec<ClusterConfig>,
}

#[derive(Clone)]
pub struct ExploratoryService {
    exploratories: Arc<dyn ExploratoryDao>,
    computational: Arc<dyn ComputationalDao>,
    projects: Arc<dyn ProjectDao>,
    dispatcher: Dispatcher,
    audit: AuditService,
    billing: BillingService,
}

impl ExploratoryService {
    pub fn new(store: &Store, dispatcher: Dispatcher, audit: AuditService, billing: BillingService) -> Self {
        Self {
            exploratories: store.exploratories.clone(),
            computational: store.computational.clone(),
            projects: store.projects.clone(),
            dispatcher,
            audit,
            billing,
        }
    }

    /// Notebook by key; 404 when unknown.
    pub async fn get(&self, key: &ExploratoryKey) -> Result<Exploratory> {
        self.exploratories
            .find(key)
            .await?
            .ok_or_else(|| Error::not_found("Notebook", key))
    }

    /// The caller's notebooks, optionally limited to one project.
    pub async fn list(&self, user: &CurrentUser, project: Option<&str>) -> Result<Vec<Exploratory>> {
        let filter = ExploratoryFilter {
            project: project.map(str::to_string),
            ..ExploratoryFilter::for_user(&user.name)
        };
        Ok(self.exploratories.list(&filter).await?)
    }

    async fn mark_failed(&self, record: &Exploratory, error: &Error) {
        let update = ExploratoryFieldsUpdate {
            error_message: Some(error.to_string()),
            ..Default::default()
        };
        let result = async {
            self.exploratories.update_status(record.id, UserInstanceStatus::Failed).await?;
            self.exploratories.update_fields(record.id, &update).await
        }
        .await;
        if let Err(e) = result {
            warn!(notebook = %record.key(), "Could not mark notebook failed: {e}");
        }
    }

    /// Dispatch an action for a notebook, marking it FAILED if the dispatch fails.
    async fn dispatch(
        &self,
        record: &Exploratory,
        path: &str,
        user: &CurrentUser,
        body: &impl serde::Serialize,
        operation: &str,
    ) -> Result<RequestUuid> {
        match self.dispatcher.send(&record.endpoint, path, user, body, operation).await {
            Ok(request_id) => Ok(request_id),
            Err(e) => {
                self.mark_failed(record, &e).await;
                Err(e)
            }
        }
    }

    async fn audit(&self, user: &CurrentUser, action: AuditAction, record: &Exploratory, info: Option<String>) {
        self.audit
            .record(&user.name, action, Some(&record.project), &record.exploratory_name, AuditResourceType::Notebook, info)
            .await;
    }

    /// Create a notebook, or re-create one whose previous incarnation was terminated or failed.
    #[instrument(skip(self, user, request), fields(user = %user.name, project = %request.project, name = %request.name), err)]
    pub async fn create(&self, user: &CurrentUser, request: ExploratoryCreate) -> Result<RequestUuid> {
        let project = check_membership(self.projects.as_ref(), user, &request.project).await?;
        let project_endpoint = project
            .endpoint(&request.endpoint)
            .ok_or_else(|| Error::bad_request(format!("Endpoint {} is not part of project {}", request.endpoint, project.name)))?;
        if project_endpoint.status != UserInstanceStatus::Running {
            return Err(Error::ResourceInappropriateState {
                message: format!(
                    "Edge node of project {} on endpoint {} is {}",
                    project.name, request.endpoint, project_endpoint.status
                ),
            });
        }
        let endpoint = self.dispatcher.endpoint(&request.endpoint).await?;
        self.billing.check_quota(&project.name).await?;

        let db_request = ExploratoryCreateDBRequest {
            user: user.name.clone(),
            project: request.project,
            endpoint: request.endpoint,
            exploratory_name: request.name,
            template_name: request.template_name,
            image: request.image,
            shape: request.shape,
            cloud_provider: endpoint.cloud_provider,
            tags: request.tags,
            cluster_config: request.cluster_config,
        };
        let key = ExploratoryKey::new(&db_request.user, &db_request.project, &db_request.exploratory_name);

        let record = match self.exploratories.find(&key).await? {
            Some(existing) => {
                existing
                    .status
                    .transition(ResourceAction::Create)
                    .map_err(|_| Error::conflict(format!("Notebook {} already exists", db_request.exploratory_name)))?;
                self.exploratories.recreate(existing.id, &db_request).await?
            }
            None => self.exploratories.insert(&db_request).await?,
        };

        let body = self.dispatcher.builder.exploratory_create(&record, project.shared_image_enabled);
        let request_id = self
            .dispatch(&record, paths::EXPLORATORY_CREATE, user, &body, "create notebook")
            .await?;
        self.audit(user, AuditAction::Create, &record, Some(format!("template {}", record.template_name)))
            .await;
        Ok(request_id)
    }

    fn next_status(record: &Exploratory, action: ResourceAction) -> Result<Option<UserInstanceStatus>> {
        match record.status.transition(action)? {
            Transition::To(status) => Ok(Some(status)),
            Transition::NoOp => Ok(None),
        }
    }

    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn start(&self, user: &CurrentUser, project: &str, name: &str) -> Result<RequestUuid> {
        let record = self.get(&ExploratoryKey::new(&user.name, project, name)).await?;
        let Some(status) = Self::next_status(&record, ResourceAction::Start)? else {
            return Err(Error::conflict(format!("Notebook {name} is already starting")));
        };
        self.billing.check_quota(project).await?;

        self.exploratories.update_status(record.id, status).await?;
        let body = self.dispatcher.builder.exploratory_action(&record);
        let request_id = self.dispatch(&record, paths::EXPLORATORY_START, user, &body, "start notebook").await?;
        self.audit(user, AuditAction::Start, &record, None).await;
        Ok(request_id)
    }

    /// Stop a notebook. Spark clusters are stopped with it, cloud clusters are terminated.
    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn stop(&self, user: &CurrentUser, project: &str, name: &str) -> Result<RequestUuid> {
        let record = self.get(&ExploratoryKey::new(&user.name, project, name)).await?;
        let Some(status) = Self::next_status(&record, ResourceAction::Stop)? else {
            return Err(Error::conflict(format!("Notebook {name} is already stopping")));
        };

        self.exploratories.update_status(record.id, status).await?;
        let cascaded = self
            .computational
            .cascade_status(
                record.id,
                child_status_on_parent_stop(ComputationalKind::Spark),
                child_status_on_parent_stop(ComputationalKind::CloudService),
                &STOP_CASCADE_EXCLUDED,
            )
            .await?;
        info!(notebook = %record.key(), cascaded, "Stopping notebook and its clusters");

        let body = self.dispatcher.builder.exploratory_action(&record);
        let request_id = self.dispatch(&record, paths::EXPLORATORY_STOP, user, &body, "stop notebook").await?;
        self.audit(user, AuditAction::Stop, &record, None).await;
        Ok(request_id)
    }

    /// Terminate a notebook and its clusters. Terminating an already terminating or terminated
    /// notebook does nothing and returns `None`.
    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn terminate(&self, user: &CurrentUser, project: &str, name: &str) -> Result<Option<RequestUuid>> {
        let record = self.get(&ExploratoryKey::new(&user.name, project, name)).await?;
        let Some(status) = Self::next_status(&record, ResourceAction::Terminate)? else {
            info!(notebook = %record.key(), status = %record.status, "Notebook already terminating");
            return Ok(None);
        };

        self.exploratories.update_status(record.id, status).await?;
        let cascaded = self
            .computational
            .cascade_status(
                record.id,
                UserInstanceStatus::Terminating,
                UserInstanceStatus::Terminating,
                &TERMINATE_CASCADE_EXCLUDED,
            )
            .await?;
        info!(notebook = %record.key(), cascaded, "Terminating notebook and its clusters");

        let body = self.dispatcher.builder.exploratory_action(&record);
        let request_id = self
            .dispatch(&record, paths::EXPLORATORY_TERMINATE, user, &body, "terminate notebook")
            .await?;
        self.audit(user, AuditAction::Terminate, &record, None).await;
        Ok(Some(request_id))
    }

    /// Replace the Spark configuration of a running notebook.
    #[instrument(skip(self, user, config), fields(user = %user.name), err)]
    pub async fn reconfigure(&self, user: &CurrentUser, project: &str, name: &str, config: Vec<ClusterConfig>) -> Result<RequestUuid> {
        let record = self.get(&ExploratoryKey::new(&user.name, project, name)).await?;
        let Some(status) = Self::next_status(&record, ResourceAction::Reconfigure)? else {
            return Err(Error::conflict(format!("Notebook {name} is already reconfiguring")));
        };

        self.exploratories.update_cluster_config(record.id, &config).await?;
        self.exploratories.update_status(record.id, status).await?;
        let body = self.dispatcher.builder.exploratory_reconfigure(&record, &config);
        let request_id = self
            .dispatch(&record, paths::EXPLORATORY_RECONFIGURE_SPARK, user, &body, "reconfigure notebook")
            .await?;
        self.audit(user, AuditAction::Reconfigure, &record, None).await;
        Ok(request_id)
    }

    /// Save a running notebook as a machine image.
    #[instrument(skip(self, user, description), fields(user = %user.name), err)]
    pub async fn create_image(
        &self,
        user: &CurrentUser,
        project: &str,
        name: &str,
        image_name: &str,
        description: Option<&str>,
    ) -> Result<RequestUuid> {
        let record = self.get(&ExploratoryKey::new(&user.name, project, name)).await?;
        let Some(status) = Self::next_status(&record, ResourceAction::CreateImage)? else {
            return Err(Error::conflict(format!("Notebook {name} is already creating an image")));
        };

        self.exploratories.update_status(record.id, status).await?;
        let body = self.dispatcher.builder.exploratory_image(&record, image_name, description);
        let request_id = self
            .dispatch(&record, paths::EXPLORATORY_IMAGE, user, &body, "create image")
            .await?;
        self.audit(user, AuditAction::CreateImage, &record, Some(format!("image {image_name}")))
            .await;
        Ok(request_id)
    }

    /// Apply a status reported by the provisioning service and return the updated notebook.
    ///
    /// A notebook reported STOPPED takes its clusters along (Spark to STOPPED, cloud clusters to
    /// TERMINATED); a TERMINATED notebook terminates every cluster.
    #[instrument(skip(self, callback), fields(user = %callback.user, name = %callback.exploratory_name, status = %callback.status), err)]
    pub async fn update_status_from_callback(&self, callback: ExploratoryStatusCallback) -> Result<Exploratory> {
        let status = UserInstanceStatus::parse(&callback.status)
            .ok_or_else(|| Error::bad_request(format!("Unknown status '{}'", callback.status)))?;
        self.dispatcher.registry.check_and_remove(callback.request_id).await?;
        let key = ExploratoryKey::new(&callback.user, &callback.project, &callback.exploratory_name);
        let record = self.get(&key).await?;

        let update = ExploratoryFieldsUpdate {
            instance_id: callback.instance_id,
            private_ip: callback.private_ip,
            exploratory_url: callback.exploratory_url,
            error_message: callback.error_message,
            last_activity: callback.last_activity,
        };
        self.exploratories.update_fields(record.id, &update).await?;
        self.exploratories.update_status(record.id, status).await?;

        match status {
            UserInstanceStatus::Stopped => {
                self.computational
                    .cascade_status(
                        record.id,
                        UserInstanceStatus::Stopped,
                        UserInstanceStatus::Terminated,
                        &[UserInstanceStatus::Failed, UserInstanceStatus::Terminated, UserInstanceStatus::Stopped],
                    )
                    .await?;
            }
            UserInstanceStatus::Terminated => {
                self.computational
                    .cascade_status(
                        record.id,
                        UserInstanceStatus::Terminated,
                        UserInstanceStatus::Terminated,
                        &[UserInstanceStatus::Failed, UserInstanceStatus::Terminated],
                    )
                    .await?;
            }
            _ => {}
        }

        self.get(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::computational::ComputationalCreateDBRequest;
    use crate::test_utils::{TestEnv, spark_request};
    use crate::types::CloudProvider;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_create_dispatches_and_registers() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");

        let request_id = env.services.exploratory.create(&user, env.create_request("nb")).await.unwrap();

        let record = env.services.exploratory.get(&ExploratoryKey::new("alice", "ds", "nb")).await.unwrap();
        assert_eq!(record.status, UserInstanceStatus::Creating);
        assert_eq!(record.cloud_provider, CloudProvider::Aws);
        assert_eq!(env.provisioning.paths(), vec![paths::EXPLORATORY_CREATE.to_string()]);
        assert_eq!(env.services.dispatcher.registry.check_and_remove(request_id).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        env.services.exploratory.create(&user, env.create_request("nb")).await.unwrap();

        let err = env.services.exploratory.create(&user, env.create_request("nb")).await.unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));
    }

    #[tokio::test]
    async fn test_create_over_terminated_recreates() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        env.services.exploratory.create(&user, env.create_request("nb")).await.unwrap();
        let first = env.services.exploratory.get(&ExploratoryKey::new("alice", "ds", "nb")).await.unwrap();
        env.store.exploratories.update_status(first.id, UserInstanceStatus::Terminated).await.unwrap();

        env.services.exploratory.create(&user, env.create_request("nb")).await.unwrap();
        let second = env.services.exploratory.get(&first.key()).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, UserInstanceStatus::Creating);
    }

    #[tokio::test]
    async fn test_create_requires_membership() {
        let env = TestEnv::with_running_project().await;
        let outsider = env.user_in("mallory", &["other"]);

        let err = env.services.exploratory.create(&outsider, env.create_request("nb")).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientPermissions { .. }));
    }

    #[tokio::test]
    async fn test_start_only_from_stopped() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        let nb = env.running_notebook("alice", "nb").await;

        let err = env.services.exploratory.start(&user, "ds", "nb").await.unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));
        assert_eq!(env.services.exploratory.get(&nb.key()).await.unwrap().status, UserInstanceStatus::Running);
        assert!(env.provisioning.paths().is_empty());
    }

    #[tokio::test]
    async fn test_start_over_budget_reports_state_before_quota() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        let nb = env.running_notebook("alice", "nb").await;
        env.exhaust_budget().await;

        let err = env.services.exploratory.start(&user, "ds", "nb").await.unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));

        env.store.exploratories.update_status(nb.id, UserInstanceStatus::Stopped).await.unwrap();
        let err = env.services.exploratory.start(&user, "ds", "nb").await.unwrap_err();
        assert!(matches!(err, Error::QuotaReached { .. }));
        assert_eq!(env.services.exploratory.get(&nb.key()).await.unwrap().status, UserInstanceStatus::Stopped);
        assert!(env.provisioning.paths().is_empty());
    }

    #[tokio::test]
    async fn test_stop_cascades_by_cluster_kind() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        let nb = env.running_notebook("alice", "nb").await;
        let spark = env.store.computational.insert(nb.id, &spark_request("spark")).await.unwrap();
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
        env.store.computational.update_status(spark.id, UserInstanceStatus::Running).await.unwrap();
        env.store.computational.update_status(cloud.id, UserInstanceStatus::Running).await.unwrap();

        env.services.exploratory.stop(&user, "ds", "nb").await.unwrap();

        let record = env.services.exploratory.get(&nb.key()).await.unwrap();
        assert_eq!(record.status, UserInstanceStatus::Stopping);
        assert_eq!(record.computational("spark").unwrap().status, UserInstanceStatus::Stopping);
        assert_eq!(record.computational("emr").unwrap().status, UserInstanceStatus::Terminating);
    }

    #[tokio::test]
    async fn test_terminate_twice_is_noop() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        env.running_notebook("alice", "nb").await;

        assert!(env.services.exploratory.terminate(&user, "ds", "nb").await.unwrap().is_some());
        assert!(env.services.exploratory.terminate(&user, "ds", "nb").await.unwrap().is_none());
        assert_eq!(env.provisioning.paths().len(), 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_marks_failed() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        let nb = env.running_notebook("alice", "nb").await;
        env.provisioning.fail_next();

        let err = env.services.exploratory.stop(&user, "ds", "nb").await.unwrap_err();
        assert!(matches!(err, Error::Datalab { .. }));
        let record = env.services.exploratory.get(&nb.key()).await.unwrap();
        assert_eq!(record.status, UserInstanceStatus::Failed);
        assert!(record.error_message.is_some());
    }

    #[tokio::test]
    async fn test_reconfigure_persists_config_first() {
        let env = TestEnv::with_running_project().await;
        let user = env.user("alice");
        let nb = env.running_notebook("alice", "nb").await;
        let config = vec![ClusterConfig {
            classification: "spark-defaults".to_string(),
            properties: BTreeMap::from([("spark.executor.memory".to_string(), "4g".to_string())]),
            configurations: vec![],
        }];
        env.provisioning.fail_next();

        assert!(env.services.exploratory.reconfigure(&user, "ds", "nb", config.clone()).await.is_err());
        assert_eq!(env.services.exploratory.get(&nb.key()).await.unwrap().cluster_config, config);
    }

    #[tokio::test]
    async fn test_callback_applies_status_and_cascade() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        let spark = env.store.computational.insert(nb.id, &spark_request("spark")).await.unwrap();
        env.store.computational.update_status(spark.id, UserInstanceStatus::Stopping).await.unwrap();
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("alice", request_id).await.unwrap();

        let callback = ExploratoryStatusCallback {
            request_id,
            user: "alice".to_string(),
            project: "ds".to_string(),
            exploratory_name: "nb".to_string(),
            status: "stopped".to_string(),
            instance_id: Some("i-1".to_string()),
            private_ip: None,
            exploratory_url: None,
            error_message: None,
            last_activity: None,
        };
        let record = env.services.exploratory.update_status_from_callback(callback.clone()).await.unwrap();
        assert_eq!(record.status, UserInstanceStatus::Stopped);
        assert_eq!(record.instance_id.as_deref(), Some("i-1"));
        assert_eq!(record.computational("spark").unwrap().status, UserInstanceStatus::Stopped);

        // The request id is consumed by the first callback
        let err = env.services.exploratory.update_status_from_callback(callback).await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_callback_rejects_unknown_status() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("alice", request_id).await.unwrap();

        let callback = ExploratoryStatusCallback {
            request_id,
            user: "alice".to_string(),
            project: "ds".to_string(),
            exploratory_name: "nb".to_string(),
            status: "hibernating".to_string(),
            instance_id: None,
            private_ip: None,
            exploratory_url: None,
            error_message: None,
            last_activity: None,
        };
        let err = env.services.exploratory.update_status_from_callback(callback.clone()).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        // The request id survives the rejected callback, so a corrected one still applies
        let corrected = ExploratoryStatusCallback {
            status: "stopped".to_string(),
            ..callback
        };
        let record = env.services.exploratory.update_status_from_callback(corrected).await.unwrap();
        assert_eq!(record.status, UserInstanceStatus::Stopped);
    }
}
