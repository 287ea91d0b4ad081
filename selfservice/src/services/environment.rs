//! Environment-wide operations: status reconciliation, quota enforcement and the admin view.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::{ComputationalDao, EndpointDao, ExploratoryDao, ProjectDao};
use crate::db::models::endpoints::EndpointStatus;
use crate::db::models::exploratories::{Exploratory, ExploratoryFilter};
use crate::db::models::projects::Project;
use crate::errors::Result;
use crate::provisioning::callbacks::EnvironmentStatusCallback;
use crate::provisioning::dto::StatusCheckResource;
use crate::provisioning::paths;
use crate::services::Dispatcher;
use crate::services::billing::BillingService;
use crate::services::exploratory::ExploratoryService;
use crate::status::{UserInstanceStatus, reconcile};
use crate::types::RequestUuid;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Name the status checks are registered under.
const SYSTEM_USER: &str = "system";

/// Every live resource, for administrators.
#[derive(Debug, Clone)]
pub struct AllResources {
    pub projects: Vec<Project>,
    pub exploratories: Vec<Exploratory>,
}

/// What a user can see of the environment: their projects and notebooks, and budget usage.
#[derive(Debug, Clone)]
pub struct UserResources {
    pub projects: Vec<Project>,
    pub exploratories: Vec<Exploratory>,
    /// Percent of each project's budget spent; absent for projects without a budget
    pub project_quotas: BTreeMap<String, f64>,
    pub total_quota_used: Option<f64>,
}

#[derive(Clone)]
pub struct EnvironmentService {
    exploratories: Arc<dyn ExploratoryDao>,
    computational: Arc<dyn ComputationalDao>,
    projects: Arc<dyn ProjectDao>,
    endpoints: Arc<dyn EndpointDao>,
    dispatcher: Dispatcher,
    exploratory: ExploratoryService,
    billing: BillingService,
    service_token: Option<String>,
}

impl EnvironmentService {
    pub fn new(
        store: &Store,
        dispatcher: Dispatcher,
        exploratory: ExploratoryService,
        billing: BillingService,
        service_token: Option<String>,
    ) -> Self {
        Self {
            exploratories: store.exploratories.clone(),
            computational: store.computational.clone(),
            projects: store.projects.clone(),
            endpoints: store.endpoints.clone(),
            dispatcher,
            exploratory,
            billing,
            service_token,
        }
    }

    fn token(&self) -> &str {
        self.service_token.as_deref().unwrap_or_default()
    }

    /// Apply the statuses observed in the cloud to the stored records. Returns the number of
    /// records changed.
    ///
    /// Unknown instance ids and status strings are skipped, and terminated records are never
    /// revived.
    #[instrument(skip(self, report), fields(endpoint = %report.endpoint, count = report.resources.len()), err)]
    pub async fn apply_observed_statuses(&self, report: EnvironmentStatusCallback) -> Result<usize> {
        self.dispatcher.registry.check_and_remove(report.request_id).await?;
        let mut changed = 0;
        for observed in report.resources {
            if let Some(notebook) = self.exploratories.find_by_instance_id(&observed.instance_id).await? {
                if notebook.status == UserInstanceStatus::Terminated {
                    continue;
                }
                if let Some(status) = reconcile(notebook.status, &observed.status) {
                    info!(notebook = %notebook.key(), from = %notebook.status, to = %status, "Reconciled notebook status");
                    self.exploratories.update_status(notebook.id, status).await?;
                    changed += 1;
                }
            } else if let Some(cluster) = self.computational.find_by_instance_id(&observed.instance_id).await? {
                if cluster.status == UserInstanceStatus::Terminated {
                    continue;
                }
                if let Some(status) = reconcile(cluster.status, &observed.status) {
                    info!(cluster = %cluster.computational_name, from = %cluster.status, to = %status, "Reconciled cluster status");
                    self.computational.update_status(cluster.id, status).await?;
                    changed += 1;
                }
            } else {
                debug!(instance_id = %observed.instance_id, "Status reported for unknown instance");
            }
        }
        Ok(changed)
    }

    /// Ask each active endpoint for the cloud status of the instances it hosts. The answers arrive
    /// on the status callback.
    #[instrument(skip(self), err)]
    pub async fn request_status_check(&self) -> Result<Vec<RequestUuid>> {
        let notebooks = self.exploratories.list(&ExploratoryFilter::default()).await?;
        let system = CurrentUser::system(SYSTEM_USER, self.token());
        let mut request_ids = Vec::new();

        for endpoint in self.endpoints.list().await? {
            if endpoint.status != EndpointStatus::Active {
                continue;
            }
            let mut resources = Vec::new();
            for notebook in notebooks
                .iter()
                .filter(|n| n.endpoint == endpoint.name && n.status != UserInstanceStatus::Terminated)
            {
                if let Some(instance_id) = &notebook.instance_id {
                    resources.push(StatusCheckResource {
                        instance_id: instance_id.clone(),
                        resource_type: "exploratory".to_string(),
                    });
                }
                resources.extend(
                    notebook
                        .computational_resources
                        .iter()
                        .filter(|c| c.status != UserInstanceStatus::Terminated)
                        .filter_map(|c| c.instance_id.clone())
                        .map(|instance_id| StatusCheckResource {
                            instance_id,
                            resource_type: "computational".to_string(),
                        }),
                );
            }
            if resources.is_empty() {
                continue;
            }

            let body = self
                .dispatcher
                .builder
                .status_check(&endpoint.name, endpoint.cloud_provider, resources);
            match self
                .dispatcher
                .send_to(&endpoint.url, paths::STATUS_CHECK, &system, &body, "check environment status")
                .await
            {
                Ok(request_id) => request_ids.push(request_id),
                Err(e) => warn!(endpoint = %endpoint.name, "Status check request failed: {e}"),
            }
        }
        Ok(request_ids)
    }

    /// Stop every running notebook in `notebooks`, acting as each owner. Returns how many stops
    /// were dispatched.
    async fn stop_notebooks(&self, notebooks: Vec<Exploratory>, token: &str) -> usize {
        let mut stopped = 0;
        for notebook in notebooks {
            let owner = CurrentUser::system(&notebook.user, token);
            match self.exploratory.stop(&owner, &notebook.project, &notebook.exploratory_name).await {
                Ok(_) => stopped += 1,
                Err(e) => warn!(notebook = %notebook.key(), "Could not stop notebook: {e}"),
            }
        }
        stopped
    }

    async fn running_notebooks(&self, filter: ExploratoryFilter) -> Result<Vec<Exploratory>> {
        Ok(self
            .exploratories
            .list(&filter.with_statuses(&[UserInstanceStatus::Running]))
            .await?)
    }

    /// Stop running notebooks, and with them their clusters, in every project whose budget is
    /// spent; stop everything when the total budget is spent.
    #[instrument(skip(self), err)]
    pub async fn enforce_quotas(&self) -> Result<usize> {
        if self.billing.is_total_quota_reached().await? {
            warn!("Total budget exhausted, stopping all running notebooks");
            let notebooks = self.running_notebooks(ExploratoryFilter::default()).await?;
            return Ok(self.stop_notebooks(notebooks, self.token()).await);
        }

        let mut stopped = 0;
        for project in self.projects.list().await? {
            if !self.billing.is_project_quota_reached(&project.name).await? {
                continue;
            }
            let notebooks = self.running_notebooks(ExploratoryFilter::for_project(&project.name)).await?;
            if !notebooks.is_empty() {
                warn!(project = %project.name, count = notebooks.len(), "Project budget exhausted, stopping notebooks");
            }
            stopped += self.stop_notebooks(notebooks, self.token()).await;
        }
        Ok(stopped)
    }

    /// Stop all running notebooks of one user.
    #[instrument(skip(self, admin), fields(admin = %admin.name), err)]
    pub async fn stop_all_for_user(&self, admin: &CurrentUser, user: &str) -> Result<usize> {
        let notebooks = self.running_notebooks(ExploratoryFilter::for_user(user)).await?;
        Ok(self.stop_notebooks(notebooks, &admin.token).await)
    }

    pub async fn list_all_resources(&self) -> Result<AllResources> {
        let mut projects = self.projects.list().await?;
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        let exploratories = self
            .exploratories
            .list(&ExploratoryFilter::default())
            .await?
            .into_iter()
            .filter(|e| e.status != UserInstanceStatus::Terminated)
            .collect();
        Ok(AllResources { projects, exploratories })
    }

    pub async fn user_resources(&self, user: &CurrentUser) -> Result<UserResources> {
        let mut projects = self.projects.list().await?;
        projects.retain(|p| user.is_admin || p.shares_group(&user.groups));
        projects.sort_by(|a, b| a.name.cmp(&b.name));

        let mut project_quotas = BTreeMap::new();
        for project in &projects {
            if let Some(used) = self.billing.project_quota_used(&project.name).await? {
                project_quotas.insert(project.name.clone(), used);
            }
        }
        let exploratories = self.exploratories.list(&ExploratoryFilter::for_user(&user.name)).await?;
        Ok(UserResources {
            projects,
            exploratories,
            project_quotas,
            total_quota_used: self.billing.total_quota_used().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::exploratories::ExploratoryFieldsUpdate;
    use crate::db::models::projects::Budget;
    use crate::provisioning::billing::RawBillingRow;
    use crate::provisioning::callbacks::ObservedStatus;
    use crate::test_utils::{TestEnv, spark_request};
    use chrono::Utc;
    use uuid::Uuid;

    async fn with_instance(env: &TestEnv, notebook: &Exploratory, instance_id: &str) {
        env.store
            .exploratories
            .update_fields(
                notebook.id,
                &ExploratoryFieldsUpdate {
                    instance_id: Some(instance_id.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_apply_observed_statuses() {
        let env = TestEnv::with_running_project().await;
        let running = env.running_notebook("alice", "nb").await;
        let dead = env.running_notebook("alice", "old").await;
        with_instance(&env, &running, "i-1").await;
        with_instance(&env, &dead, "i-2").await;
        env.store.exploratories.update_status(dead.id, UserInstanceStatus::Terminated).await.unwrap();
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put(SYSTEM_USER, request_id).await.unwrap();

        let changed = env
            .services
            .environment
            .apply_observed_statuses(EnvironmentStatusCallback {
                request_id,
                endpoint: "local".to_string(),
                resources: vec![
                    ObservedStatus {
                        instance_id: "i-1".to_string(),
                        status: "stopped".to_string(),
                    },
                    ObservedStatus {
                        instance_id: "i-2".to_string(),
                        status: "running".to_string(),
                    },
                    ObservedStatus {
                        instance_id: "i-3".to_string(),
                        status: "running".to_string(),
                    },
                ],
            })
            .await
            .unwrap();

        assert_eq!(changed, 1);
        assert_eq!(env.services.exploratory.get(&running.key()).await.unwrap().status, UserInstanceStatus::Stopped);
        assert_eq!(env.services.exploratory.get(&dead.key()).await.unwrap().status, UserInstanceStatus::Terminated);
    }

    #[tokio::test]
    async fn test_status_check_lists_instances_per_endpoint() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        with_instance(&env, &nb, "i-1").await;
        env.store.computational.insert(nb.id, &spark_request("spark")).await.unwrap();

        let request_ids = env.services.environment.request_status_check().await.unwrap();

        assert_eq!(request_ids.len(), 1);
        assert_eq!(env.provisioning.paths(), vec![paths::STATUS_CHECK.to_string()]);
        let body = env.provisioning.bodies().pop().unwrap();
        assert_eq!(body["resources"][0]["instance_id"], "i-1");
        assert_eq!(body["resources"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enforce_quotas_stops_over_budget_project() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        let mut project = env.services.project.get("ds").await.unwrap();
        project.budget = Budget {
            value: Some(10),
            monthly_budget: false,
        };
        env.store.projects.update(&project).await.unwrap();
        env.billing_source.set_rows(vec![RawBillingRow {
            datalab_id: env.services.dispatcher.builder.exploratory_tag(&nb),
            product: "EC2".to_string(),
            usage_type: None,
            usage_date: Utc::now().date_naive(),
            cost: 12.0,
            currency: None,
        }]);
        env.services.billing.collect_current_month("token").await.unwrap();

        assert_eq!(env.services.environment.enforce_quotas().await.unwrap(), 1);
        assert_eq!(env.services.exploratory.get(&nb.key()).await.unwrap().status, UserInstanceStatus::Stopping);
    }

    #[tokio::test]
    async fn test_stop_all_for_user() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "a").await;
        env.running_notebook("alice", "b").await;
        let bob = env.running_notebook("bob", "c").await;

        assert_eq!(env.services.environment.stop_all_for_user(&env.admin(), "alice").await.unwrap(), 2);
        assert_eq!(env.services.exploratory.get(&bob.key()).await.unwrap().status, UserInstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_user_resources_include_quota() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        env.running_notebook("bob", "other").await;

        let resources = env.services.environment.user_resources(&env.user("alice")).await.unwrap();
        assert_eq!(resources.projects.len(), 1);
        assert_eq!(resources.exploratories.len(), 1);
        assert!(resources.project_quotas.is_empty());
        assert_eq!(resources.total_quota_used, None);
    }
}
