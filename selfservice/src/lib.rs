//! # selfservice: DataLab self-service control plane
//!
//! `selfservice` is the REST API users and administrators of a DataLab installation talk to. It
//! keeps the record of every notebook ("exploratory"), cluster ("computational resource"),
//! project and endpoint, decides which lifecycle actions are allowed, and hands the actual cloud
//! work to the provisioning service running on each endpoint.
//!
//! ## Request Flow
//!
//! A lifecycle request (start a notebook, create a cluster, install libraries) is authenticated
//! from a JWT, checked against the resource's current status and the project's budget, recorded
//! in its transitional status (`STARTING`, `CREATING`, ...) and dispatched to the endpoint's
//! provisioning service. The client gets `202 Accepted` with a request id straight away. When the
//! cloud work finishes, the provisioning service posts the outcome back to a callback endpoint
//! and the record moves to its final status.
//!
//! ```text
//! client ──PUT /api/...──▶ handler ──▶ service ──▶ store (status = CREATING)
//!                                         │
//!                                         └──POST──▶ provisioning service
//!                                                          │
//! store (status = RUNNING) ◀── service ◀── callback ◀──────┘
//! ```
//!
//! ### Core Components
//!
//! - [`api`]: axum handlers and request/response models, documented with utoipa
//! - [`auth`]: JWT and callback-token extractors
//! - [`services`]: lifecycle rules, quota checks and dispatch
//! - [`db`]: stores behind traits, PostgreSQL or in memory
//! - [`provisioning`]: HTTP client for the provisioning service and the documents it exchanges
//! - [`background`]: status reconciliation, schedules, billing collection
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use selfservice::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = selfservice::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     selfservice::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod background;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod provisioning;
pub mod services;
pub mod status;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::api::handlers::{
    audit, backups, billing, callbacks, computational, endpoints, environment, exploratories, libraries, projects, scheduler,
};
use crate::background::BackgroundServices;
use crate::config::{CorsOrigin, DatabaseConfig, PoolSettings};
use crate::db::Store;
use crate::openapi::ApiDoc;
use crate::provisioning::ReqwestProvisioningService;
use crate::provisioning::billing::ProvisioningBillingSource;
use crate::services::Services;
use axum::http::HeaderValue;
use axum::{
    Json, Router, http,
    routing::{delete, get, post, put},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .services(services)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub services: Services,
}

/// Get the selfservice database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the configured store. For PostgreSQL this connects and runs migrations first.
async fn setup_store(config: &Config) -> anyhow::Result<(Store, Option<PgPool>)> {
    match &config.database {
        DatabaseConfig::External { url, pool } => {
            info!("Using external database");
            let pool = pool_options(pool).connect(url).await?;
            migrator().run(&pool).await?;
            Ok((Store::postgres(pool.clone()), Some(pool)))
        }
        DatabaseConfig::InMemory => {
            info!("Using in-memory store: records will be lost on shutdown");
            Ok((Store::in_memory(), None))
        }
    }
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let seconds = |s: u64| (s > 0).then(|| Duration::from_secs(s));
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(seconds(settings.idle_timeout_secs))
        .max_lifetime(seconds(settings.max_lifetime_secs))
}

/// Create CORS layer from configuration
///
/// A wildcard anywhere in `allowed_origins` allows any origin; tower-http refuses `*` inside a list.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allowed = &config.auth.security.cors.allowed_origins;
    let allow_origin = if allowed.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in allowed {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Routes served under `/api`.
fn api_routes() -> Router<AppState> {
    Router::new()
        // Notebooks
        .route(
            "/infrastructure_provision/exploratory_environment",
            get(exploratories::list_exploratories)
                .put(exploratories::create_exploratory)
                .post(exploratories::start_exploratory),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/reconfigure",
            put(exploratories::reconfigure_exploratory),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/{project}/{name}",
            get(exploratories::get_exploratory),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/{project}/{name}/stop",
            delete(exploratories::stop_exploratory),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/{project}/{name}/terminate",
            delete(exploratories::terminate_exploratory),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/{project}/{name}/image",
            post(exploratories::create_image),
        )
        // Libraries
        .route(
            "/infrastructure_provision/exploratory_environment/lib_install",
            post(libraries::install_libraries),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/lib_list",
            get(libraries::list_libraries),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/lib_groups",
            get(libraries::list_lib_groups),
        )
        // Schedules
        .route(
            "/infrastructure_provision/exploratory_environment/scheduler/{project}/{name}",
            get(scheduler::get_exploratory_schedule).post(scheduler::set_exploratory_schedule),
        )
        .route(
            "/infrastructure_provision/exploratory_environment/scheduler/{project}/{name}/{computational}",
            get(scheduler::get_computational_schedule).post(scheduler::set_computational_schedule),
        )
        // Clusters
        .route(
            "/infrastructure_provision/computational_resources/dataengine",
            put(computational::create_spark_cluster),
        )
        .route(
            "/infrastructure_provision/computational_resources/dataengine-service",
            put(computational::create_cloud_cluster),
        )
        .route(
            "/infrastructure_provision/computational_resources/dataengine/{project}/{exploratory}/{name}/config",
            put(computational::reconfigure_computational),
        )
        .route(
            "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}",
            get(computational::get_computational),
        )
        .route(
            "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}/start",
            put(computational::start_computational),
        )
        .route(
            "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}/stop",
            delete(computational::stop_computational),
        )
        .route(
            "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}/terminate",
            delete(computational::terminate_computational),
        )
        // Provisioning callbacks
        .route("/infrastructure_provision/callback/exploratory", post(callbacks::exploratory_callback))
        .route("/infrastructure_provision/callback/computational", post(callbacks::computational_callback))
        .route("/infrastructure_provision/callback/library", post(callbacks::library_callback))
        .route("/infrastructure_provision/callback/project", post(callbacks::project_callback))
        .route("/infrastructure_provision/callback/backup", post(callbacks::backup_callback))
        .route("/infrastructure_provision/callback/status", post(callbacks::status_callback))
        // Projects
        .route(
            "/project",
            get(projects::list_projects).post(projects::create_project).put(projects::update_project),
        )
        .route("/project/budget", put(projects::update_budget))
        .route("/project/start", post(projects::start_project_endpoint))
        .route("/project/stop", post(projects::stop_project_endpoint))
        .route("/project/terminate", post(projects::terminate_project_endpoint))
        .route("/project/{name}", get(projects::get_project))
        // Endpoints
        .route("/endpoint", get(endpoints::list_endpoints).post(endpoints::create_endpoint))
        .route("/endpoint/{name}", get(endpoints::get_endpoint).delete(endpoints::delete_endpoint))
        .route("/endpoint/{name}/healthcheck", get(endpoints::endpoint_health))
        // Billing
        .route(
            "/billing/report",
            get(billing::billing_report_query).post(billing::billing_report),
        )
        .route("/billing/quota/{project}", get(billing::project_quota))
        // Environment
        .route("/infrastructure/info", get(environment::infrastructure_info))
        .route("/environment/all", get(environment::all_resources))
        .route("/environment/stop/{user}", post(environment::stop_user_environment))
        // Backups
        .route("/infrastructure/backup", get(backups::list_backups).post(backups::create_backup))
        .route("/infrastructure/backup/{id}", get(backups::get_backup))
        // Audit
        .route("/audit", get(audit::list_audit))
}

/// Build the main application router with all endpoints and middleware.
///
/// This function constructs the complete Axum router with:
/// - The self-service API under `/api`
/// - OpenAPI JSON and the Scalar UI
/// - Optional Prometheus metrics
/// - CORS configuration
/// - Tracing middleware
///
/// # Errors
///
/// Returns an error if CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api", api_routes())
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    // Add Prometheus metrics if enabled
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] opens the store, runs migrations, wires the services and
///    starts background loops
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, gracefully stops all services
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting self-service with configuration: {:#?}", config);

        let (store, pool) = setup_store(&config).await?;

        let provisioning = Arc::new(ReqwestProvisioningService::new(&config.provisioning)?);
        let billing_source = Arc::new(ProvisioningBillingSource::new(provisioning.clone()));
        let services = Services::new(store, provisioning, billing_source, &config);

        let bg_services = BackgroundServices::start(services.clone(), &config, CancellationToken::new());

        let app_state = AppState::builder().config(config.clone()).services(services).build();
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Self-service listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{BackgroundServicesConfig, TaskConfig};
    use crate::test_utils::{TestEnv, create_test_config, install_crypto_provider};

    fn quiet_config() -> Config {
        let mut config = create_test_config();
        let disabled = TaskConfig {
            enabled: false,
            interval: Duration::from_secs(60),
        };
        config.background_services = BackgroundServicesConfig {
            status_check: disabled.clone(),
            scheduler: disabled.clone(),
            billing: disabled.clone(),
            request_id_cleanup: disabled,
        };
        config
    }

    #[test_log::test(tokio::test)]
    async fn test_application_serves_health_and_docs() {
        install_crypto_provider();
        let app = Application::new(quiet_config()).await.unwrap();
        let (server, bg_services) = app.into_test_server();

        server.get("/healthz").await.assert_text("OK");

        let doc = server.get("/api-docs/openapi.json").await;
        doc.assert_status_ok();
        assert!(doc.text().contains("DataLab self-service API"));

        server.get("/docs").await.assert_status_ok();
        bg_services.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_api_requires_authentication() {
        let env = TestEnv::with_running_project().await;
        let server = env.server();

        server
            .get("/api/infrastructure_provision/exploratory_environment")
            .await
            .assert_status_unauthorized();
        server
            .get("/api/project")
            .add_header("authorization", "Bearer not-a-jwt")
            .await
            .assert_status_unauthorized();
    }

    #[test_log::test(tokio::test)]
    async fn test_cors_origins_from_config() {
        let mut config = create_test_config();
        config.auth.security.cors.allowed_origins = vec![CorsOrigin::Url("https://datalab.example.com/".parse().unwrap())];
        assert!(create_cors_layer(&config).is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_default_config_allows_any_origin() {
        let env = TestEnv::with_config(Config::default()).await;
        let server = env.server();

        let response = server.get("/healthz").add_header("origin", "https://anywhere.example.com").await;
        response.assert_status_ok();
        assert_eq!(response.header("access-control-allow-origin"), "*");
    }

    #[test_log::test(tokio::test)]
    async fn test_explicit_origins_echo_only_listed_origin() {
        let mut config = create_test_config();
        config.auth.security.cors.allowed_origins = vec![CorsOrigin::Url("https://datalab.example.com/".parse().unwrap())];
        let server = TestEnv::with_config(config).await.server();

        let response = server.get("/healthz").add_header("origin", "https://datalab.example.com").await;
        assert_eq!(response.header("access-control-allow-origin"), "https://datalab.example.com");

        let response = server.get("/healthz").add_header("origin", "https://evil.example.com").await;
        assert!(response.maybe_header("access-control-allow-origin").is_none());
    }
}
