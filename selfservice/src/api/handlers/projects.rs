use crate::AppState;
use crate::api::models::accepted::{AcceptedResponse, accepted, terminated};
use crate::api::models::projects::{
    BudgetUpdateRequest, ProjectCreateRequest, ProjectEndpointAction, ProjectResponse, ProjectUpdateRequest,
};
use crate::auth::{CurrentUser, RequireAdmin};
use crate::errors::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};

#[utoipa::path(
    post,
    path = "/project",
    tag = "projects",
    summary = "Create project",
    request_body = ProjectCreateRequest,
    responses(
        (status = 202, description = "Edge creation dispatched, one request per endpoint", body = Vec<AcceptedResponse>),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Unknown endpoint"),
        (status = 409, description = "Project already exists"),
        (status = 422, description = "Invalid request body")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_project(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    Json(request): Json<ProjectCreateRequest>,
) -> Result<(StatusCode, Json<Vec<AcceptedResponse>>)> {
    request.validate()?;
    let request_ids = state.services.project.create(&user, request.into()).await?;
    let body = request_ids.into_iter().map(|request_id| AcceptedResponse { request_id }).collect();
    Ok((StatusCode::ACCEPTED, Json(body)))
}

#[utoipa::path(
    get,
    path = "/project",
    tag = "projects",
    summary = "List projects",
    responses((status = 200, description = "All projects for admins, the caller's projects otherwise", body = Vec<ProjectResponse>)),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_projects(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<ProjectResponse>>> {
    let projects = state.services.project.list(&user).await?;
    Ok(Json(projects.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/project/{name}",
    tag = "projects",
    summary = "Get project",
    params(("name" = String, Path)),
    responses(
        (status = 200, description = "Project", body = ProjectResponse),
        (status = 403, description = "Not a member of the project"),
        (status = 404, description = "Project not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_project(State(state): State<AppState>, Path(name): Path<String>, user: CurrentUser) -> Result<Json<ProjectResponse>> {
    let project = state.services.project.check_membership(&user, &name).await?;
    Ok(Json(project.into()))
}

#[utoipa::path(
    put,
    path = "/project",
    tag = "projects",
    summary = "Update project",
    request_body = ProjectUpdateRequest,
    responses(
        (status = 200, description = "Updated project", body = ProjectResponse),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Project or endpoint not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_project(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    Json(request): Json<ProjectUpdateRequest>,
) -> Result<Json<ProjectResponse>> {
    let project = state.services.project.update(&user, request.into()).await?;
    Ok(Json(project.into()))
}

#[utoipa::path(
    put,
    path = "/project/budget",
    tag = "projects",
    summary = "Update project budget",
    request_body = BudgetUpdateRequest,
    responses(
        (status = 200, description = "Updated project", body = ProjectResponse),
        (status = 403, description = "Admin only"),
        (status = 422, description = "Negative budget")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_budget(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    Json(request): Json<BudgetUpdateRequest>,
) -> Result<Json<ProjectResponse>> {
    let project = state.services.project.update_budget(&user, &request.project, request.budget).await?;
    Ok(Json(project.into()))
}

#[utoipa::path(
    post,
    path = "/project/start",
    tag = "projects",
    summary = "Start project edge",
    request_body = ProjectEndpointAction,
    responses(
        (status = 202, description = "Start dispatched", body = AcceptedResponse),
        (status = 409, description = "Edge is not stopped")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn start_project_endpoint(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ProjectEndpointAction>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let request_id = state
        .services
        .project
        .start_endpoint(&user, &request.project, &request.endpoint)
        .await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    post,
    path = "/project/stop",
    tag = "projects",
    summary = "Stop project edge",
    description = "Stops the project's running notebooks on the endpoint, then the edge itself.",
    request_body = ProjectEndpointAction,
    responses(
        (status = 202, description = "Stop dispatched", body = AcceptedResponse),
        (status = 409, description = "Edge is not running")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn stop_project_endpoint(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ProjectEndpointAction>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let request_id = state
        .services
        .project
        .stop_endpoint(&user, &request.project, &request.endpoint)
        .await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    post,
    path = "/project/terminate",
    tag = "projects",
    summary = "Terminate project edge",
    description = "Terminates the project's notebooks on the endpoint, then the edge itself.",
    request_body = ProjectEndpointAction,
    responses(
        (status = 202, description = "Termination dispatched", body = AcceptedResponse),
        (status = 200, description = "Already terminating or terminated")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn terminate_project_endpoint(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ProjectEndpointAction>,
) -> Result<Response> {
    let request_id = state
        .services
        .project
        .terminate_endpoint(&user, &request.project, &request.endpoint)
        .await?;
    Ok(terminated(request_id))
}
