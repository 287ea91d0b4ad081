//! Process-local implementations of the DAO traits.
//!
//! Used with `database.type: in_memory` for local development and by the test suite. Semantics
//! follow the PostgreSQL implementations, including unique key violations.

use crate::db::errors::{DbError, Result};
use crate::db::handlers::{AuditDao, BackupDao, BillingDao, ComputationalDao, EndpointDao, ExploratoryDao, ProjectDao, RequestIdDao};
use crate::db::models::audit::{AuditCreateDBRequest, AuditEntry, AuditFilter};
use crate::db::models::backups::{Backup, BackupStatus};
use crate::db::models::billing::{BillingFilter, BillingReportLine};
use crate::db::models::computational::{ComputationalCreateDBRequest, ComputationalFieldsUpdate, ComputationalResource};
use crate::db::models::endpoints::{Endpoint, EndpointCreateDBRequest, EndpointStatus};
use crate::db::models::exploratories::{ClusterConfig, Exploratory, ExploratoryCreateDBRequest, ExploratoryFieldsUpdate, ExploratoryFilter};
use crate::db::models::libraries::Library;
use crate::db::models::projects::{Project, ProjectCreateDBRequest, ProjectEndpoint};
use crate::db::models::request_ids::RequestId;
use crate::db::models::scheduler::SchedulerJobData;
use crate::status::UserInstanceStatus;
use crate::types::{BackupId, ComputationalId, ComputationalKind, ExploratoryId, ExploratoryKey, RequestUuid};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    exploratories: HashMap<ExploratoryId, Exploratory>,
    computational: HashMap<ComputationalId, ComputationalResource>,
    projects: BTreeMap<String, Project>,
    endpoints: BTreeMap<String, Endpoint>,
    billing: Vec<BillingReportLine>,
    audit: Vec<AuditEntry>,
    request_ids: HashMap<RequestUuid, RequestId>,
    backups: HashMap<BackupId, Backup>,
}

impl State {
    fn with_clusters(&self, record: &Exploratory) -> Exploratory {
        let mut record = record.clone();
        let mut clusters: Vec<_> = self
            .computational
            .values()
            .filter(|c| c.exploratory_id == record.id)
            .cloned()
            .collect();
        clusters.sort_by_key(|c| c.created_at);
        record.computational_resources = clusters;
        record
    }

    fn exploratory_mut(&mut self, id: ExploratoryId) -> Result<&mut Exploratory> {
        let record = self.exploratories.get_mut(&id).ok_or(DbError::NotFound)?;
        record.updated_at = Utc::now();
        Ok(record)
    }

    fn computational_mut(&mut self, id: ComputationalId) -> Result<&mut ComputationalResource> {
        let record = self.computational.get_mut(&id).ok_or(DbError::NotFound)?;
        record.updated_at = Utc::now();
        Ok(record)
    }
}

/// All tables behind one lock. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_recyclable(status: UserInstanceStatus) -> bool {
    matches!(status, UserInstanceStatus::Terminated | UserInstanceStatus::Failed)
}

#[async_trait::async_trait]
impl ExploratoryDao for InMemoryStore {
    async fn insert(&self, request: &ExploratoryCreateDBRequest) -> Result<Exploratory> {
        let mut state = self.state.write().await;
        let key = ExploratoryKey::new(&request.user, &request.project, &request.exploratory_name);
        if state.exploratories.values().any(|e| e.key() == key) {
            return Err(DbError::duplicate("exploratories", "exploratories_user_project_name_unique", key));
        }

        let now = Utc::now();
        let record = Exploratory {
            id: Uuid::new_v4(),
            user: request.user.clone(),
            project: request.project.clone(),
            endpoint: request.endpoint.clone(),
            exploratory_name: request.exploratory_name.clone(),
            template_name: request.template_name.clone(),
            image: request.image.clone(),
            shape: request.shape.clone(),
            cloud_provider: request.cloud_provider,
            status: UserInstanceStatus::Creating,
            instance_id: None,
            private_ip: None,
            exploratory_url: Vec::new(),
            tags: request.tags.clone(),
            cluster_config: request.cluster_config.clone(),
            libs: Vec::new(),
            scheduler_data: None,
            error_message: None,
            last_activity: None,
            created_at: now,
            updated_at: now,
            computational_resources: Vec::new(),
        };
        state.exploratories.insert(record.id, record.clone());
        Ok(record)
    }

    async fn recreate(&self, id: ExploratoryId, request: &ExploratoryCreateDBRequest) -> Result<Exploratory> {
        let mut state = self.state.write().await;
        let record = state
            .exploratories
            .get_mut(&id)
            .filter(|e| is_recyclable(e.status))
            .ok_or(DbError::NotFound)?;

        let now = Utc::now();
        record.endpoint = request.endpoint.clone();
        record.template_name = request.template_name.clone();
        record.image = request.image.clone();
        record.shape = request.shape.clone();
        record.cloud_provider = request.cloud_provider;
        record.status = UserInstanceStatus::Creating;
        record.tags = request.tags.clone();
        record.cluster_config = request.cluster_config.clone();
        record.instance_id = None;
        record.private_ip = None;
        record.exploratory_url.clear();
        record.libs.clear();
        record.scheduler_data = None;
        record.error_message = None;
        record.last_activity = None;
        record.created_at = now;
        record.updated_at = now;

        let record = record.clone();
        Ok(state.with_clusters(&record))
    }

    async fn find(&self, key: &ExploratoryKey) -> Result<Option<Exploratory>> {
        let state = self.state.read().await;
        Ok(state.exploratories.values().find(|e| e.key() == *key).map(|e| state.with_clusters(e)))
    }

    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<Exploratory>> {
        let state = self.state.read().await;
        Ok(state
            .exploratories
            .values()
            .find(|e| e.instance_id.as_deref() == Some(instance_id))
            .map(|e| state.with_clusters(e)))
    }

    async fn list(&self, filter: &ExploratoryFilter) -> Result<Vec<Exploratory>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .exploratories
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| state.with_clusters(e))
            .collect();
        records.sort_by_key(|e| e.created_at);
        Ok(records)
    }

    async fn update_status(&self, id: ExploratoryId, status: UserInstanceStatus) -> Result<()> {
        self.state.write().await.exploratory_mut(id)?.status = status;
        Ok(())
    }

    async fn update_fields(&self, id: ExploratoryId, update: &ExploratoryFieldsUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state.exploratory_mut(id)?;
        if let Some(instance_id) = &update.instance_id {
            record.instance_id = Some(instance_id.clone());
        }
        if let Some(private_ip) = &update.private_ip {
            record.private_ip = Some(private_ip.clone());
        }
        if let Some(urls) = &update.exploratory_url {
            record.exploratory_url = urls.clone();
        }
        if let Some(error) = &update.error_message {
            record.error_message = Some(error.clone());
        }
        if let Some(last_activity) = update.last_activity {
            record.last_activity = Some(last_activity);
        }
        Ok(())
    }

    async fn update_cluster_config(&self, id: ExploratoryId, config: &[ClusterConfig]) -> Result<()> {
        self.state.write().await.exploratory_mut(id)?.cluster_config = config.to_vec();
        Ok(())
    }

    async fn update_libs(&self, id: ExploratoryId, libs: &[Library]) -> Result<()> {
        self.state.write().await.exploratory_mut(id)?.libs = libs.to_vec();
        Ok(())
    }

    async fn update_scheduler(&self, id: ExploratoryId, data: Option<&SchedulerJobData>) -> Result<()> {
        self.state.write().await.exploratory_mut(id)?.scheduler_data = data.cloned();
        Ok(())
    }
}

#[async_trait::async_trait]
impl ComputationalDao for InMemoryStore {
    async fn insert(&self, exploratory_id: ExploratoryId, request: &ComputationalCreateDBRequest) -> Result<ComputationalResource> {
        let mut state = self.state.write().await;
        if !state.exploratories.contains_key(&exploratory_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("computational_resources_exploratory_id_fkey".to_string()),
                table: Some("computational_resources".to_string()),
                message: format!("notebook {exploratory_id} does not exist"),
            });
        }
        if state
            .computational
            .values()
            .any(|c| c.exploratory_id == exploratory_id && c.computational_name == request.computational_name)
        {
            return Err(DbError::duplicate(
                "computational_resources",
                "computational_resources_name_unique",
                &request.computational_name,
            ));
        }

        let now = Utc::now();
        let record = ComputationalResource {
            id: Uuid::new_v4(),
            exploratory_id,
            computational_name: request.computational_name.clone(),
            resource_type: request.resource_type,
            image: request.image.clone(),
            status: UserInstanceStatus::Creating,
            instance_id: None,
            master_shape: request.master_shape.clone(),
            slave_shape: request.slave_shape.clone(),
            total_instance_number: request.total_instance_number,
            version: request.version.clone(),
            resource_url: Vec::new(),
            config: request.config.clone(),
            libs: Vec::new(),
            scheduler_data: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.computational.insert(record.id, record.clone());
        Ok(record)
    }

    async fn recreate(&self, id: ComputationalId, request: &ComputationalCreateDBRequest) -> Result<ComputationalResource> {
        let mut state = self.state.write().await;
        let record = state
            .computational
            .get_mut(&id)
            .filter(|c| is_recyclable(c.status))
            .ok_or(DbError::NotFound)?;

        let now = Utc::now();
        record.resource_type = request.resource_type;
        record.image = request.image.clone();
        record.status = UserInstanceStatus::Creating;
        record.master_shape = request.master_shape.clone();
        record.slave_shape = request.slave_shape.clone();
        record.total_instance_number = request.total_instance_number;
        record.version = request.version.clone();
        record.config = request.config.clone();
        record.instance_id = None;
        record.resource_url.clear();
        record.libs.clear();
        record.scheduler_data = None;
        record.error_message = None;
        record.created_at = now;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<ComputationalResource>> {
        let state = self.state.read().await;
        Ok(state
            .computational
            .values()
            .find(|c| c.instance_id.as_deref() == Some(instance_id))
            .cloned())
    }

    async fn list_for_exploratories(&self, exploratory_ids: &[ExploratoryId]) -> Result<Vec<ComputationalResource>> {
        let state = self.state.read().await;
        let mut clusters: Vec<_> = state
            .computational
            .values()
            .filter(|c| exploratory_ids.contains(&c.exploratory_id))
            .cloned()
            .collect();
        clusters.sort_by_key(|c| c.created_at);
        Ok(clusters)
    }

    async fn update_status(&self, id: ComputationalId, status: UserInstanceStatus) -> Result<()> {
        self.state.write().await.computational_mut(id)?.status = status;
        Ok(())
    }

    async fn cascade_status(
        &self,
        exploratory_id: ExploratoryId,
        spark_status: UserInstanceStatus,
        cloud_status: UserInstanceStatus,
        excluded: &[UserInstanceStatus],
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for cluster in state
            .computational
            .values_mut()
            .filter(|c| c.exploratory_id == exploratory_id && !excluded.contains(&c.status))
        {
            cluster.status = match cluster.resource_type {
                ComputationalKind::Spark => spark_status,
                ComputationalKind::CloudService => cloud_status,
            };
            cluster.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn update_fields(&self, id: ComputationalId, update: &ComputationalFieldsUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state.computational_mut(id)?;
        if let Some(instance_id) = &update.instance_id {
            record.instance_id = Some(instance_id.clone());
        }
        if let Some(urls) = &update.resource_url {
            record.resource_url = urls.clone();
        }
        if let Some(error) = &update.error_message {
            record.error_message = Some(error.clone());
        }
        Ok(())
    }

    async fn update_config(&self, id: ComputationalId, config: &[ClusterConfig]) -> Result<()> {
        self.state.write().await.computational_mut(id)?.config = config.to_vec();
        Ok(())
    }

    async fn update_libs(&self, id: ComputationalId, libs: &[Library]) -> Result<()> {
        self.state.write().await.computational_mut(id)?.libs = libs.to_vec();
        Ok(())
    }

    async fn update_scheduler(&self, id: ComputationalId, data: Option<&SchedulerJobData>) -> Result<()> {
        self.state.write().await.computational_mut(id)?.scheduler_data = data.cloned();
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProjectDao for InMemoryStore {
    async fn insert(&self, request: &ProjectCreateDBRequest) -> Result<Project> {
        let mut state = self.state.write().await;
        if state.projects.contains_key(&request.name) {
            return Err(DbError::duplicate("projects", "projects_pkey", &request.name));
        }
        let project = Project {
            name: request.name.clone(),
            groups: request.groups.clone(),
            endpoints: request.endpoints.clone(),
            budget: request.budget.clone(),
            shared_image_enabled: request.shared_image_enabled,
            created_at: Utc::now(),
        };
        state.projects.insert(project.name.clone(), project.clone());
        Ok(project)
    }

    async fn get(&self, name: &str) -> Result<Option<Project>> {
        Ok(self.state.read().await.projects.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Project>> {
        Ok(self.state.read().await.projects.values().cloned().collect())
    }

    async fn update(&self, project: &Project) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state.projects.get_mut(&project.name).ok_or(DbError::NotFound)?;
        stored.groups = project.groups.clone();
        stored.endpoints = project.endpoints.clone();
        stored.budget = project.budget.clone();
        stored.shared_image_enabled = project.shared_image_enabled;
        Ok(())
    }

    async fn update_endpoint(&self, project: &str, endpoint: &ProjectEndpoint) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .projects
            .get_mut(project)
            .and_then(|p| p.endpoint_mut(&endpoint.name))
            .ok_or(DbError::NotFound)?;
        *stored = endpoint.clone();
        Ok(())
    }
}

#[async_trait::async_trait]
impl EndpointDao for InMemoryStore {
    async fn insert(&self, request: &EndpointCreateDBRequest) -> Result<Endpoint> {
        let mut state = self.state.write().await;
        if state.endpoints.contains_key(&request.name) {
            return Err(DbError::duplicate("endpoints", "endpoints_pkey", &request.name));
        }
        if state.endpoints.values().any(|e| e.url == request.url) {
            return Err(DbError::duplicate("endpoints", "endpoints_url_unique", &request.url));
        }
        let endpoint = Endpoint {
            name: request.name.clone(),
            url: request.url.clone(),
            account: request.account.clone(),
            tag: request.tag.clone(),
            cloud_provider: request.cloud_provider,
            status: EndpointStatus::Active,
            created_at: Utc::now(),
        };
        state.endpoints.insert(endpoint.name.clone(), endpoint.clone());
        Ok(endpoint)
    }

    async fn get(&self, name: &str) -> Result<Option<Endpoint>> {
        Ok(self.state.read().await.endpoints.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Endpoint>> {
        Ok(self.state.read().await.endpoints.values().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.state.write().await.endpoints.remove(name).is_some())
    }

    async fn update_status(&self, name: &str, status: EndpointStatus) -> Result<()> {
        let mut state = self.state.write().await;
        state.endpoints.get_mut(name).ok_or(DbError::NotFound)?.status = status;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BillingDao for InMemoryStore {
    async fn replace_lines(&self, endpoint: &str, from: NaiveDate, to: NaiveDate, lines: &[BillingReportLine]) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .billing
            .retain(|l| !(l.endpoint.as_deref() == Some(endpoint) && l.usage_date >= from && l.usage_date <= to));
        state.billing.extend(lines.iter().cloned().map(|mut line| {
            line.endpoint = Some(endpoint.to_string());
            line
        }));
        Ok(())
    }

    async fn lines(&self, filter: &BillingFilter) -> Result<Vec<BillingReportLine>> {
        let state = self.state.read().await;
        let mut lines: Vec<_> = state.billing.iter().filter(|l| filter.matches(l)).cloned().collect();
        lines.sort_by(|a, b| a.usage_date.cmp(&b.usage_date).then_with(|| a.datalab_id.cmp(&b.datalab_id)));
        Ok(lines)
    }

    async fn project_cost(&self, project: &str, since: Option<NaiveDate>) -> Result<f64> {
        let state = self.state.read().await;
        Ok(state
            .billing
            .iter()
            .filter(|l| l.project.as_deref() == Some(project) && since.is_none_or(|s| l.usage_date >= s))
            .map(|l| l.cost)
            .sum())
    }

    async fn total_cost(&self, since: Option<NaiveDate>) -> Result<f64> {
        let state = self.state.read().await;
        Ok(state
            .billing
            .iter()
            .filter(|l| since.is_none_or(|s| l.usage_date >= s))
            .map(|l| l.cost)
            .sum())
    }
}

#[async_trait::async_trait]
impl AuditDao for InMemoryStore {
    async fn insert(&self, request: &AuditCreateDBRequest) -> Result<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            user: request.user.clone(),
            action: request.action,
            project: request.project.clone(),
            resource_name: request.resource_name.clone(),
            resource_type: request.resource_type,
            info: request.info.clone(),
            timestamp: Utc::now(),
        };
        self.state.write().await.audit.push(entry.clone());
        Ok(entry)
    }

    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditEntry>, i64)> {
        let state = self.state.read().await;
        let mut matching: Vec<_> = state.audit.iter().filter(|e| filter.matches(e)).cloned().collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }
}

#[async_trait::async_trait]
impl RequestIdDao for InMemoryStore {
    async fn put(&self, request: &RequestId) -> Result<()> {
        self.state.write().await.request_ids.insert(request.id, request.clone());
        Ok(())
    }

    async fn take(&self, id: RequestUuid, now: DateTime<Utc>) -> Result<Option<RequestId>> {
        let mut state = self.state.write().await;
        Ok(state.request_ids.remove(&id).filter(|r| r.expiration_time >= now))
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.request_ids.len();
        state.request_ids.retain(|_, r| r.expiration_time >= now);
        Ok((before - state.request_ids.len()) as u64)
    }
}

#[async_trait::async_trait]
impl BackupDao for InMemoryStore {
    async fn insert(&self, backup: &Backup) -> Result<()> {
        let mut state = self.state.write().await;
        if state.backups.contains_key(&backup.id) {
            return Err(DbError::duplicate("backups", "backups_pkey", backup.id));
        }
        state.backups.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn get(&self, user: &str, id: BackupId) -> Result<Option<Backup>> {
        Ok(self.state.read().await.backups.get(&id).filter(|b| b.user == user).cloned())
    }

    async fn list(&self, user: &str) -> Result<Vec<Backup>> {
        let state = self.state.read().await;
        let mut backups: Vec<_> = state.backups.values().filter(|b| b.user == user).cloned().collect();
        backups.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(backups)
    }

    async fn update_status(&self, id: BackupId, status: BackupStatus, file_name: Option<&str>, error_message: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let backup = state.backups.get_mut(&id).ok_or(DbError::NotFound)?;
        backup.status = status;
        if let Some(file_name) = file_name {
            backup.file_name = Some(file_name.to_string());
        }
        backup.error_message = error_message.map(str::to_string);
        backup.updated_at = Utc::now();
        Ok(())
    }
}
