//! Test utilities for building services over the in-memory store with a recording provisioning
//! service standing in for the real one.

use crate::auth::CurrentUser;
use crate::auth::token::issue_token;
use crate::config::{Config, DatabaseConfig};
use crate::db::Store;
use crate::db::models::billing::{BillingReportLine, BillingResourceType};
use crate::db::models::computational::ComputationalCreateDBRequest;
use crate::db::models::endpoints::EndpointCreateDBRequest;
use crate::db::models::exploratories::{Exploratory, ExploratoryCreateDBRequest};
use crate::db::models::projects::{Budget, ProjectCreateDBRequest, ProjectEndpoint};
use crate::provisioning::billing::{BillingSource, RawBillingRow};
use crate::provisioning::{ProvisioningError, ProvisioningService};
use crate::services::Services;
use crate::services::exploratory::ExploratoryCreate;
use crate::status::UserInstanceStatus;
use crate::types::{CloudProvider, ComputationalKind, ExploratoryKey};
use crate::{AppState, build_router};
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;
use uuid::Uuid;

pub const CALLBACK_TOKEN: &str = "callback-secret";

#[derive(Debug, Clone)]
struct RecordedCall {
    base_url: Url,
    path: String,
    body: Value,
    request_id: Uuid,
}

/// Records every POST instead of sending it. `fail_next` makes the next call fail with a 500.
#[derive(Default)]
pub struct RecordingProvisioning {
    calls: Mutex<Vec<RecordedCall>>,
    fail_next: AtomicBool,
}

impl RecordingProvisioning {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.calls().into_iter().map(|c| c.body).collect()
    }

    pub fn base_urls(&self) -> Vec<Url> {
        self.calls().into_iter().map(|c| c.base_url).collect()
    }

    pub fn last_request_id(&self) -> Option<Uuid> {
        self.calls().last().map(|c| c.request_id)
    }

    fn injected_failure(&self) -> Option<ProvisioningError> {
        self.fail_next.swap(false, Ordering::SeqCst).then(|| ProvisioningError::Status {
            status: 500,
            body: "injected failure".to_string(),
        })
    }
}

#[async_trait]
impl ProvisioningService for RecordingProvisioning {
    async fn post(&self, base_url: &Url, path: &str, _token: &str, body: &Value) -> Result<Uuid, ProvisioningError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        let request_id = Uuid::new_v4();
        self.calls.lock().expect("calls lock").push(RecordedCall {
            base_url: base_url.clone(),
            path: path.to_string(),
            body: body.clone(),
            request_id,
        });
        Ok(request_id)
    }

    async fn get(&self, _base_url: &Url, _path: &str, _token: &str) -> Result<Value, ProvisioningError> {
        match self.injected_failure() {
            Some(err) => Err(err),
            None => Ok(json!({"status": "ok"})),
        }
    }
}

/// Returns whatever rows were last set, for any date range.
#[derive(Default)]
pub struct StaticBillingSource {
    rows: Mutex<Vec<RawBillingRow>>,
}

impl StaticBillingSource {
    pub fn set_rows(&self, rows: Vec<RawBillingRow>) {
        *self.rows.lock().expect("rows lock") = rows;
    }
}

#[async_trait]
impl BillingSource for StaticBillingSource {
    async fn fetch(&self, _base_url: &Url, _token: &str, _from: NaiveDate, _to: NaiveDate) -> Result<Vec<RawBillingRow>, ProvisioningError> {
        Ok(self.rows.lock().expect("rows lock").clone())
    }
}

/// reqwest is built without a default TLS provider; main installs one, tests do it here.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub fn create_test_config() -> Config {
    let mut config = Config {
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        database: DatabaseConfig::InMemory,
        ..Default::default()
    };
    config.auth.callback_token = Some(CALLBACK_TOKEN.to_string());
    config.provisioning.ssn_url = Url::parse("http://ssn.example.com/").expect("valid url");
    config
}

pub fn endpoint_request(name: &str) -> EndpointCreateDBRequest {
    EndpointCreateDBRequest {
        name: name.to_string(),
        url: Url::parse(&format!("http://{name}.example.com/")).expect("valid url"),
        account: format!("{name}-account"),
        tag: None,
        cloud_provider: CloudProvider::Aws,
    }
}

pub fn notebook_request(user: &str, project: &str, name: &str) -> ExploratoryCreateDBRequest {
    ExploratoryCreateDBRequest {
        user: user.to_string(),
        project: project.to_string(),
        endpoint: "local".to_string(),
        exploratory_name: name.to_string(),
        template_name: "Jupyter notebook".to_string(),
        image: "docker.datalab-jupyter".to_string(),
        shape: "t2.medium".to_string(),
        cloud_provider: CloudProvider::Aws,
        tags: BTreeMap::new(),
        cluster_config: vec![],
    }
}

pub fn spark_request(name: &str) -> ComputationalCreateDBRequest {
    ComputationalCreateDBRequest {
        computational_name: name.to_string(),
        resource_type: ComputationalKind::Spark,
        image: "docker.datalab-dataengine".to_string(),
        master_shape: "c4.xlarge".to_string(),
        slave_shape: Some("c4.xlarge".to_string()),
        total_instance_number: 2,
        version: None,
        config: vec![],
    }
}

/// Services wired over a fresh in-memory store.
pub struct TestEnv {
    pub store: Store,
    pub services: Services,
    pub provisioning: Arc<RecordingProvisioning>,
    pub billing_source: Arc<StaticBillingSource>,
    pub config: Config,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(create_test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let store = Store::in_memory();
        let provisioning = Arc::new(RecordingProvisioning::default());
        let billing_source = Arc::new(StaticBillingSource::default());
        let services = Services::new(store.clone(), provisioning.clone(), billing_source.clone(), &config);
        Self {
            store,
            services,
            provisioning,
            billing_source,
            config,
        }
    }

    /// Endpoint `local` and project `ds` (group `ds`) whose edge on `local` is running.
    pub async fn with_running_project() -> Self {
        let env = Self::new().await;
        env.store.endpoints.insert(&endpoint_request("local")).await.expect("insert endpoint");
        env.store
            .projects
            .insert(&ProjectCreateDBRequest {
                name: "ds".to_string(),
                groups: BTreeSet::from(["ds".to_string()]),
                endpoints: vec![ProjectEndpoint {
                    name: "local".to_string(),
                    status: UserInstanceStatus::Running,
                    edge_info: None,
                }],
                budget: Budget::default(),
                shared_image_enabled: false,
            })
            .await
            .expect("insert project");
        env
    }

    /// Give project `ds` a budget of 10 and record 20 of spend against it.
    pub async fn exhaust_budget(&self) {
        let mut project = self.services.project.get("ds").await.expect("project ds");
        project.budget = Budget {
            value: Some(10),
            monthly_budget: false,
        };
        self.store.projects.update(&project).await.expect("update project");
        let day = Utc::now().date_naive();
        let line = BillingReportLine {
            datalab_id: "ds-spend".to_string(),
            endpoint: Some("local".to_string()),
            user: None,
            project: Some("ds".to_string()),
            exploratory_name: None,
            resource_name: None,
            resource_type: BillingResourceType::Edge,
            shape: None,
            product: "EC2".to_string(),
            usage_type: None,
            usage_date: day,
            cost: 20.0,
            currency: "USD".to_string(),
        };
        self.store
            .billing
            .replace_lines("local", day, day, &[line])
            .await
            .expect("record spend");
    }

    /// A non-admin member of group `ds`.
    pub fn user(&self, name: &str) -> CurrentUser {
        self.user_in(name, &["ds"])
    }

    pub fn user_in(&self, name: &str, groups: &[&str]) -> CurrentUser {
        CurrentUser {
            name: name.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            is_admin: false,
            token: format!("token-{name}"),
        }
    }

    pub fn admin(&self) -> CurrentUser {
        CurrentUser {
            name: "admin".to_string(),
            groups: BTreeSet::from([self.config.auth.admin_group.clone()]),
            is_admin: true,
            token: "token-admin".to_string(),
        }
    }

    pub fn create_request(&self, name: &str) -> ExploratoryCreate {
        ExploratoryCreate {
            project: "ds".to_string(),
            endpoint: "local".to_string(),
            name: name.to_string(),
            template_name: "Jupyter notebook".to_string(),
            image: "docker.datalab-jupyter".to_string(),
            shape: "t2.medium".to_string(),
            tags: BTreeMap::new(),
            cluster_config: vec![],
        }
    }

    /// A RUNNING notebook written straight to the store, without dispatching anything.
    pub async fn running_notebook(&self, user: &str, name: &str) -> Exploratory {
        let nb = self
            .store
            .exploratories
            .insert(&notebook_request(user, "ds", name))
            .await
            .expect("insert notebook");
        self.store
            .exploratories
            .update_status(nb.id, UserInstanceStatus::Running)
            .await
            .expect("update status");
        self.store
            .exploratories
            .find(&ExploratoryKey::new(user, "ds", name))
            .await
            .expect("find notebook")
            .expect("notebook exists")
    }

    /// HTTP server over the same services.
    pub fn server(&self) -> TestServer {
        let state = AppState::builder()
            .config(self.config.clone())
            .services(self.services.clone())
            .build();
        let router = build_router(&state).expect("build router");
        TestServer::new(router).expect("Failed to create test server")
    }

    /// `Authorization` header value carrying a JWT for `user`.
    pub fn bearer(&self, user: &CurrentUser) -> String {
        let token = issue_token(&user.name, user.groups.clone(), &self.config).expect("issue token");
        format!("Bearer {token}")
    }
}
