use crate::AppState;
use crate::api::models::accepted::{AcceptedResponse, accepted, terminated};
use crate::api::models::computational::{CloudClusterCreateRequest, ComputationalResponse, SparkClusterCreateRequest};
use crate::auth::CurrentUser;
use crate::db::models::exploratories::ClusterConfig;
use crate::errors::Result;
use crate::types::{ComputationalKey, ExploratoryKey};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};

fn key(user: &CurrentUser, project: String, exploratory: String, name: String) -> ComputationalKey {
    ExploratoryKey::new(&user.name, project, exploratory).computational(name)
}

#[utoipa::path(
    put,
    path = "/infrastructure_provision/computational_resources/dataengine",
    tag = "computational",
    summary = "Create Spark cluster",
    request_body = SparkClusterCreateRequest,
    responses(
        (status = 202, description = "Creation dispatched", body = AcceptedResponse),
        (status = 404, description = "Notebook not found"),
        (status = 409, description = "A cluster with this name already exists"),
        (status = 422, description = "Invalid request body"),
        (status = 500, description = "Notebook not running or provisioning failed")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_spark_cluster(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<SparkClusterCreateRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    request.validate()?;
    let request_id = state.services.computational.create(&user, request.into()).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    put,
    path = "/infrastructure_provision/computational_resources/dataengine-service",
    tag = "computational",
    summary = "Create cloud managed cluster",
    request_body = CloudClusterCreateRequest,
    responses(
        (status = 202, description = "Creation dispatched", body = AcceptedResponse),
        (status = 404, description = "Notebook not found"),
        (status = 409, description = "A cluster with this name already exists"),
        (status = 422, description = "Invalid request body")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_cloud_cluster(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CloudClusterCreateRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    request.validate()?;
    let request_id = state.services.computational.create(&user, request.into()).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    put,
    path = "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}/start",
    tag = "computational",
    summary = "Start Spark cluster",
    params(("project" = String, Path), ("exploratory" = String, Path), ("name" = String, Path)),
    responses(
        (status = 202, description = "Start dispatched", body = AcceptedResponse),
        (status = 400, description = "Cloud managed clusters cannot be started"),
        (status = 409, description = "Cluster is not stopped")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn start_computational(
    State(state): State<AppState>,
    Path((project, exploratory, name)): Path<(String, String, String)>,
    user: CurrentUser,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let key = key(&user, project, exploratory, name);
    let request_id = state.services.computational.start(&user, &key).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    delete,
    path = "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}/stop",
    tag = "computational",
    summary = "Stop Spark cluster",
    params(("project" = String, Path), ("exploratory" = String, Path), ("name" = String, Path)),
    responses(
        (status = 202, description = "Stop dispatched", body = AcceptedResponse),
        (status = 400, description = "Cloud managed clusters cannot be stopped"),
        (status = 409, description = "Cluster is not running")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn stop_computational(
    State(state): State<AppState>,
    Path((project, exploratory, name)): Path<(String, String, String)>,
    user: CurrentUser,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let key = key(&user, project, exploratory, name);
    let request_id = state.services.computational.stop(&user, &key).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    delete,
    path = "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}/terminate",
    tag = "computational",
    summary = "Terminate cluster",
    params(("project" = String, Path), ("exploratory" = String, Path), ("name" = String, Path)),
    responses(
        (status = 202, description = "Termination dispatched", body = AcceptedResponse),
        (status = 200, description = "Already terminating or terminated"),
        (status = 404, description = "Cluster not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn terminate_computational(
    State(state): State<AppState>,
    Path((project, exploratory, name)): Path<(String, String, String)>,
    user: CurrentUser,
) -> Result<Response> {
    let key = key(&user, project, exploratory, name);
    let request_id = state.services.computational.terminate(&user, &key).await?;
    Ok(terminated(request_id))
}

#[utoipa::path(
    put,
    path = "/infrastructure_provision/computational_resources/dataengine/{project}/{exploratory}/{name}/config",
    tag = "computational",
    summary = "Reconfigure Spark cluster",
    params(("project" = String, Path), ("exploratory" = String, Path), ("name" = String, Path)),
    request_body = Vec<ClusterConfig>,
    responses(
        (status = 202, description = "Reconfiguration dispatched", body = AcceptedResponse),
        (status = 409, description = "Cluster is not running")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn reconfigure_computational(
    State(state): State<AppState>,
    Path((project, exploratory, name)): Path<(String, String, String)>,
    user: CurrentUser,
    Json(config): Json<Vec<ClusterConfig>>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let key = key(&user, project, exploratory, name);
    let request_id = state.services.computational.reconfigure(&user, &key, config).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    get,
    path = "/infrastructure_provision/computational_resources/{project}/{exploratory}/{name}",
    tag = "computational",
    summary = "Get cluster",
    params(("project" = String, Path), ("exploratory" = String, Path), ("name" = String, Path)),
    responses(
        (status = 200, description = "Cluster", body = ComputationalResponse),
        (status = 404, description = "Cluster not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_computational(
    State(state): State<AppState>,
    Path((project, exploratory, name)): Path<(String, String, String)>,
    user: CurrentUser,
) -> Result<Json<ComputationalResponse>> {
    let (_, cluster) = state.services.computational.get(&key(&user, project, exploratory, name)).await?;
    Ok(Json(cluster.into()))
}
