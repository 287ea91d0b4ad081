//! Projects and their per-endpoint edge nodes.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::{ExploratoryDao, ProjectDao};
use crate::db::models::audit::{AuditAction, AuditResourceType};
use crate::db::models::exploratories::{Exploratory, ExploratoryFilter};
use crate::db::models::projects::{Budget, Project, ProjectCreateDBRequest, ProjectEndpoint};
use crate::errors::{Error, Result};
use crate::provisioning::callbacks::ProjectStatusCallback;
use crate::provisioning::paths;
use crate::services::audit::AuditService;
use crate::services::exploratory::ExploratoryService;
use crate::services::{Dispatcher, check_membership};
use crate::status::{ResourceAction, Transition, UserInstanceStatus};
use crate::types::RequestUuid;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ProjectCreate {
    pub name: String,
    pub groups: BTreeSet<String>,
    pub endpoints: Vec<String>,
    pub budget: Budget,
    pub shared_image_enabled: bool,
}

/// New groups, endpoints and image sharing for a project. Endpoints already in the project are
/// kept even when omitted.
#[derive(Debug, Clone)]
pub struct ProjectUpdate {
    pub name: String,
    pub groups: BTreeSet<String>,
    pub endpoints: Vec<String>,
    pub shared_image_enabled: bool,
}

#[derive(Clone)]
pub struct ProjectService {
    projects: Arc<dyn ProjectDao>,
    exploratories: Arc<dyn ExploratoryDao>,
    dispatcher: Dispatcher,
    audit: AuditService,
    exploratory: ExploratoryService,
}

impl ProjectService {
    pub fn new(store: &Store, dispatcher: Dispatcher, audit: AuditService, exploratory: ExploratoryService) -> Self {
        Self {
            projects: store.projects.clone(),
            exploratories: store.exploratories.clone(),
            dispatcher,
            audit,
            exploratory,
        }
    }

    pub async fn get(&self, name: &str) -> Result<Project> {
        self.projects.get(name).await?.ok_or_else(|| Error::not_found("Project", name))
    }

    /// Admins see every project; other users see the projects sharing one of their groups.
    pub async fn list(&self, user: &CurrentUser) -> Result<Vec<Project>> {
        let mut projects = self.projects.list().await?;
        if !user.is_admin {
            projects.retain(|p| p.shares_group(&user.groups));
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    pub async fn check_membership(&self, user: &CurrentUser, project: &str) -> Result<Project> {
        check_membership(self.projects.as_ref(), user, project).await
    }

    async fn require_endpoints_exist(&self, endpoints: &[String]) -> Result<()> {
        for endpoint in endpoints {
            self.dispatcher.endpoint(endpoint).await?;
        }
        Ok(())
    }

    /// Ask the provisioning service to build the edge node of `project` on `endpoint`, marking the
    /// project endpoint FAILED if the request cannot be sent.
    async fn dispatch(
        &self,
        user: &CurrentUser,
        project: &Project,
        endpoint: &str,
        path: &str,
        operation: &str,
    ) -> Result<RequestUuid> {
        let cloud_provider = self.dispatcher.endpoint(endpoint).await?.cloud_provider;
        let body = self.dispatcher.builder.project_action(project, endpoint, cloud_provider);
        match self.dispatcher.send(endpoint, path, user, &body, operation).await {
            Ok(request_id) => Ok(request_id),
            Err(e) => {
                let failed = ProjectEndpoint {
                    name: endpoint.to_string(),
                    status: UserInstanceStatus::Failed,
                    edge_info: project.endpoint(endpoint).and_then(|e| e.edge_info.clone()),
                };
                if let Err(store_err) = self.projects.update_endpoint(&project.name, &failed).await {
                    warn!(project = %project.name, endpoint, "Could not mark edge node failed: {store_err}");
                }
                Err(e)
            }
        }
    }

    /// Request an edge node on every endpoint. Each endpoint is attempted even after a failure so
    /// that none is left CREATING without a request in flight; the first failure is returned.
    async fn create_edges(&self, user: &CurrentUser, project: &Project, endpoints: &[String]) -> Result<Vec<RequestUuid>> {
        let mut request_ids = Vec::with_capacity(endpoints.len());
        let mut first_error = None;
        for endpoint in endpoints {
            match self.dispatch(user, project, endpoint, paths::PROJECT_CREATE, "create project").await {
                Ok(request_id) => request_ids.push(request_id),
                Err(e) => {
                    warn!(project = %project.name, endpoint, "Edge node request failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(request_ids),
        }
    }

    /// Create a project and one edge node per endpoint.
    #[instrument(skip(self, user, request), fields(user = %user.name, project = %request.name), err)]
    pub async fn create(&self, user: &CurrentUser, request: ProjectCreate) -> Result<Vec<RequestUuid>> {
        if request.endpoints.is_empty() {
            return Err(Error::Validation {
                errors: vec!["a project needs at least one endpoint".to_string()],
            });
        }
        if self.projects.get(&request.name).await?.is_some() {
            return Err(Error::conflict(format!("Project {} already exists", request.name)));
        }
        self.require_endpoints_exist(&request.endpoints).await?;

        let endpoints: BTreeSet<String> = request.endpoints.into_iter().collect();
        let project = self
            .projects
            .insert(&ProjectCreateDBRequest {
                name: request.name,
                groups: request.groups,
                endpoints: endpoints
                    .iter()
                    .map(|name| ProjectEndpoint {
                        name: name.clone(),
                        status: UserInstanceStatus::Creating,
                        edge_info: None,
                    })
                    .collect(),
                budget: request.budget,
                shared_image_enabled: request.shared_image_enabled,
            })
            .await?;

        let endpoints: Vec<String> = endpoints.into_iter().collect();
        let request_ids = self.create_edges(user, &project, &endpoints).await?;
        self.audit
            .record(
                &user.name,
                AuditAction::Create,
                Some(&project.name),
                &project.name,
                AuditResourceType::Project,
                Some(format!("endpoints {}", endpoints.join(", "))),
            )
            .await;
        Ok(request_ids)
    }

    /// Replace groups and image sharing, and create edge nodes on endpoints new to the project.
    #[instrument(skip(self, user, request), fields(user = %user.name, project = %request.name), err)]
    pub async fn update(&self, user: &CurrentUser, request: ProjectUpdate) -> Result<Project> {
        let mut project = self.get(&request.name).await?;
        let added: Vec<String> = request
            .endpoints
            .into_iter()
            .filter(|name| project.endpoint(name).is_none())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.require_endpoints_exist(&added).await?;

        project.groups = request.groups;
        project.shared_image_enabled = request.shared_image_enabled;
        project.endpoints.extend(added.iter().map(|name| ProjectEndpoint {
            name: name.clone(),
            status: UserInstanceStatus::Creating,
            edge_info: None,
        }));
        self.projects.update(&project).await?;

        self.create_edges(user, &project, &added).await?;
        self.audit
            .record(
                &user.name,
                AuditAction::Update,
                Some(&project.name),
                &project.name,
                AuditResourceType::Project,
                (!added.is_empty()).then(|| format!("added endpoints {}", added.join(", "))),
            )
            .await;
        self.get(&project.name).await
    }

    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn update_budget(&self, user: &CurrentUser, project: &str, budget: Budget) -> Result<Project> {
        if budget.value.is_some_and(|v| v < 0) {
            return Err(Error::Validation {
                errors: vec!["budget must not be negative".to_string()],
            });
        }
        let mut record = self.get(project).await?;
        record.budget = budget;
        self.projects.update(&record).await?;
        let info = match record.budget.limit() {
            Some(limit) if record.budget.monthly_budget => format!("monthly budget {limit}"),
            Some(limit) => format!("budget {limit}"),
            None => "budget removed".to_string(),
        };
        self.audit
            .record(&user.name, AuditAction::Update, Some(project), project, AuditResourceType::Project, Some(info))
            .await;
        Ok(record)
    }

    async fn project_endpoint(&self, user: &CurrentUser, project: &str, endpoint: &str) -> Result<(Project, ProjectEndpoint)> {
        let project = self.check_membership(user, project).await?;
        let project_endpoint = project
            .endpoint(endpoint)
            .cloned()
            .ok_or_else(|| Error::not_found("Project endpoint", format!("{}/{endpoint}", project.name)))?;
        Ok((project, project_endpoint))
    }

    async fn set_edge_status(&self, project: &Project, edge: &ProjectEndpoint, status: UserInstanceStatus) -> Result<()> {
        let updated = ProjectEndpoint {
            status,
            ..edge.clone()
        };
        Ok(self.projects.update_endpoint(&project.name, &updated).await?)
    }

    async fn audit_edge(&self, user: &CurrentUser, action: AuditAction, project: &Project, endpoint: &str) {
        self.audit
            .record(&user.name, action, Some(&project.name), endpoint, AuditResourceType::Edge, None)
            .await;
    }

    /// Notebooks of the project on one endpoint, acted on as their owners.
    async fn notebooks_on(&self, project: &str, endpoint: &str, statuses: &[UserInstanceStatus]) -> Result<Vec<Exploratory>> {
        let filter = ExploratoryFilter {
            endpoint: Some(endpoint.to_string()),
            ..ExploratoryFilter::for_project(project)
        }
        .with_statuses(statuses);
        Ok(self.exploratories.list(&filter).await?)
    }

    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn start_endpoint(&self, user: &CurrentUser, project: &str, endpoint: &str) -> Result<RequestUuid> {
        let (project, edge) = self.project_endpoint(user, project, endpoint).await?;
        let Transition::To(status) = edge.status.transition(ResourceAction::Start)? else {
            return Err(Error::conflict(format!("Edge node of {} on {endpoint} is already starting", project.name)));
        };
        self.set_edge_status(&project, &edge, status).await?;
        let request_id = self
            .dispatch(user, &project, endpoint, paths::PROJECT_START, "start edge node")
            .await?;
        self.audit_edge(user, AuditAction::Start, &project, endpoint).await;
        Ok(request_id)
    }

    /// Stop the project's running notebooks on the endpoint, then its edge node.
    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn stop_endpoint(&self, user: &CurrentUser, project: &str, endpoint: &str) -> Result<RequestUuid> {
        let (project, edge) = self.project_endpoint(user, project, endpoint).await?;
        let Transition::To(status) = edge.status.transition(ResourceAction::Stop)? else {
            return Err(Error::conflict(format!("Edge node of {} on {endpoint} is already stopping", project.name)));
        };

        for notebook in self.notebooks_on(&project.name, endpoint, &[UserInstanceStatus::Running]).await? {
            let owner = CurrentUser::system(&notebook.user, &user.token);
            if let Err(e) = self.exploratory.stop(&owner, &notebook.project, &notebook.exploratory_name).await {
                warn!(notebook = %notebook.key(), "Could not stop notebook before its edge node: {e}");
            }
        }

        self.set_edge_status(&project, &edge, status).await?;
        let request_id = self
            .dispatch(user, &project, endpoint, paths::PROJECT_STOP, "stop edge node")
            .await?;
        self.audit_edge(user, AuditAction::Stop, &project, endpoint).await;
        Ok(request_id)
    }

    /// Terminate every notebook of the project on the endpoint, then its edge node. Terminating an
    /// edge node that is already going away does nothing and returns `None`.
    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn terminate_endpoint(&self, user: &CurrentUser, project: &str, endpoint: &str) -> Result<Option<RequestUuid>> {
        let (project, edge) = self.project_endpoint(user, project, endpoint).await?;
        let Transition::To(status) = edge.status.transition(ResourceAction::Terminate)? else {
            info!(project = %project.name, endpoint, "Edge node already terminating");
            return Ok(None);
        };

        for notebook in self.notebooks_on(&project.name, endpoint, &[]).await? {
            if notebook.status.is_terminal() {
                continue;
            }
            let owner = CurrentUser::system(&notebook.user, &user.token);
            if let Err(e) = self
                .exploratory
                .terminate(&owner, &notebook.project, &notebook.exploratory_name)
                .await
            {
                warn!(notebook = %notebook.key(), "Could not terminate notebook before its edge node: {e}");
            }
        }

        self.set_edge_status(&project, &edge, status).await?;
        let request_id = self
            .dispatch(user, &project, endpoint, paths::PROJECT_TERMINATE, "terminate edge node")
            .await?;
        self.audit_edge(user, AuditAction::Terminate, &project, endpoint).await;
        Ok(Some(request_id))
    }

    #[instrument(skip(self, callback), fields(project = %callback.project, endpoint = %callback.endpoint, status = %callback.status), err)]
    pub async fn update_status_from_callback(&self, callback: ProjectStatusCallback) -> Result<ProjectEndpoint> {
        let status = UserInstanceStatus::parse(&callback.status)
            .ok_or_else(|| Error::bad_request(format!("Unknown status '{}'", callback.status)))?;
        self.dispatcher.registry.check_and_remove(callback.request_id).await?;
        let project = self.get(&callback.project).await?;
        let current = project
            .endpoint(&callback.endpoint)
            .ok_or_else(|| Error::not_found("Project endpoint", format!("{}/{}", project.name, callback.endpoint)))?;

        let updated = ProjectEndpoint {
            name: callback.endpoint,
            status,
            edge_info: callback.edge_info.or_else(|| current.edge_info.clone()),
        };
        self.projects.update_endpoint(&project.name, &updated).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::projects::EdgeInfo;
    use crate::test_utils::{TestEnv, endpoint_request};
    use uuid::Uuid;

    fn create_request(name: &str, endpoints: &[&str]) -> ProjectCreate {
        ProjectCreate {
            name: name.to_string(),
            groups: BTreeSet::from(["ml".to_string()]),
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
            budget: Budget::default(),
            shared_image_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_create_dispatches_per_endpoint() {
        let env = TestEnv::new().await;
        env.store.endpoints.insert(&endpoint_request("local")).await.unwrap();
        env.store.endpoints.insert(&endpoint_request("remote")).await.unwrap();
        let admin = env.admin();

        let request_ids = env.services.project.create(&admin, create_request("ml", &["local", "remote"])).await.unwrap();

        assert_eq!(request_ids.len(), 2);
        let project = env.services.project.get("ml").await.unwrap();
        assert!(project.endpoints.iter().all(|e| e.status == UserInstanceStatus::Creating));
        assert_eq!(env.provisioning.paths(), vec![paths::PROJECT_CREATE.to_string(); 2]);
    }

    #[tokio::test]
    async fn test_create_attempts_every_endpoint_after_a_failure() {
        let env = TestEnv::new().await;
        env.store.endpoints.insert(&endpoint_request("a")).await.unwrap();
        env.store.endpoints.insert(&endpoint_request("b")).await.unwrap();
        env.provisioning.fail_next();

        let result = env.services.project.create(&env.admin(), create_request("ml", &["a", "b"])).await;
        assert!(matches!(result, Err(Error::Datalab { .. })));

        let project = env.services.project.get("ml").await.unwrap();
        let statuses: Vec<_> = project.endpoints.iter().map(|e| (e.name.as_str(), e.status)).collect();
        assert_eq!(statuses, vec![("a", UserInstanceStatus::Failed), ("b", UserInstanceStatus::Creating)]);
        assert_eq!(env.provisioning.paths(), vec![paths::PROJECT_CREATE.to_string()]);
        assert_eq!(env.provisioning.base_urls()[0].host_str(), Some("b.example.com"));
    }

    #[tokio::test]
    async fn test_create_duplicate_and_unknown_endpoint() {
        let env = TestEnv::with_running_project().await;
        let admin = env.admin();

        let err = env.services.project.create(&admin, create_request("ds", &["local"])).await.unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));

        let err = env.services.project.create(&admin, create_request("ml", &["nowhere"])).await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_by_group() {
        let env = TestEnv::with_running_project().await;
        env.services.project.create(&env.admin(), create_request("ml", &["local"])).await.unwrap();

        let names = |projects: Vec<Project>| projects.into_iter().map(|p| p.name).collect::<Vec<_>>();
        assert_eq!(names(env.services.project.list(&env.user("alice")).await.unwrap()), vec!["ds"]);
        assert_eq!(names(env.services.project.list(&env.admin()).await.unwrap()), vec!["ds", "ml"]);
    }

    #[tokio::test]
    async fn test_update_creates_new_endpoints_only() {
        let env = TestEnv::with_running_project().await;
        env.store.endpoints.insert(&endpoint_request("remote")).await.unwrap();

        let project = env
            .services
            .project
            .update(
                &env.admin(),
                ProjectUpdate {
                    name: "ds".to_string(),
                    groups: BTreeSet::from(["ds".to_string(), "ml".to_string()]),
                    endpoints: vec!["local".to_string(), "remote".to_string()],
                    shared_image_enabled: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(project.endpoint("local").unwrap().status, UserInstanceStatus::Running);
        assert_eq!(project.endpoint("remote").unwrap().status, UserInstanceStatus::Creating);
        assert!(project.shared_image_enabled);
        assert_eq!(env.provisioning.paths(), vec![paths::PROJECT_CREATE.to_string()]);
    }

    #[tokio::test]
    async fn test_stop_endpoint_stops_notebooks_first() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;

        env.services.project.stop_endpoint(&env.user("bob"), "ds", "local").await.unwrap();

        assert_eq!(env.services.exploratory.get(&nb.key()).await.unwrap().status, UserInstanceStatus::Stopping);
        let project = env.services.project.get("ds").await.unwrap();
        assert_eq!(project.endpoint("local").unwrap().status, UserInstanceStatus::Stopping);
        assert_eq!(
            env.provisioning.paths(),
            vec![paths::EXPLORATORY_STOP.to_string(), paths::PROJECT_STOP.to_string()]
        );
    }

    #[tokio::test]
    async fn test_terminate_endpoint_is_idempotent() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        let admin = env.admin();

        assert!(env.services.project.terminate_endpoint(&admin, "ds", "local").await.unwrap().is_some());
        assert!(env.services.project.terminate_endpoint(&admin, "ds", "local").await.unwrap().is_none());
        assert_eq!(env.services.exploratory.get(&nb.key()).await.unwrap().status, UserInstanceStatus::Terminating);
    }

    #[tokio::test]
    async fn test_outsider_cannot_manage_edge() {
        let env = TestEnv::with_running_project().await;
        let err = env
            .services
            .project
            .stop_endpoint(&env.user_in("mallory", &["other"]), "ds", "local")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientPermissions { .. }));
    }

    #[tokio::test]
    async fn test_budget_update() {
        let env = TestEnv::with_running_project().await;
        let budget = Budget {
            value: Some(100),
            monthly_budget: true,
        };
        let project = env.services.project.update_budget(&env.admin(), "ds", budget.clone()).await.unwrap();
        assert_eq!(project.budget, budget);

        let err = env
            .services
            .project
            .update_budget(&env.admin(), "ds", Budget { value: Some(-1), monthly_budget: false })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_callback_keeps_edge_info_when_missing() {
        let env = TestEnv::with_running_project().await;
        let edge_info = EdgeInfo {
            public_ip: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("admin", request_id).await.unwrap();
        env.services
            .project
            .update_status_from_callback(ProjectStatusCallback {
                request_id,
                project: "ds".to_string(),
                endpoint: "local".to_string(),
                status: "running".to_string(),
                edge_info: Some(edge_info.clone()),
            })
            .await
            .unwrap();

        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("admin", request_id).await.unwrap();
        let updated = env
            .services
            .project
            .update_status_from_callback(ProjectStatusCallback {
                request_id,
                project: "ds".to_string(),
                endpoint: "local".to_string(),
                status: "stopped".to_string(),
                edge_info: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.status, UserInstanceStatus::Stopped);
        assert_eq!(updated.edge_info, Some(edge_info));
    }
}
