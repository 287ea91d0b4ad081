use crate::AppState;
use crate::auth::CurrentUser;
use crate::db::models::scheduler::SchedulerJobData;
use crate::errors::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

#[utoipa::path(
    post,
    path = "/infrastructure_provision/exploratory_environment/scheduler/{project}/{name}",
    tag = "scheduler",
    summary = "Set notebook schedule",
    params(("project" = String, Path), ("name" = String, Path)),
    request_body = SchedulerJobData,
    responses(
        (status = 200, description = "Schedule saved"),
        (status = 404, description = "Notebook not found"),
        (status = 409, description = "Notebook is terminated"),
        (status = 422, description = "Invalid schedule")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn set_exploratory_schedule(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    user: CurrentUser,
    Json(data): Json<SchedulerJobData>,
) -> Result<StatusCode> {
    state.services.scheduler.update_for_exploratory(&user, &project, &name, data).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/infrastructure_provision/exploratory_environment/scheduler/{project}/{name}",
    tag = "scheduler",
    summary = "Get notebook schedule",
    params(("project" = String, Path), ("name" = String, Path)),
    responses(
        (status = 200, description = "The schedule", body = SchedulerJobData),
        (status = 404, description = "Notebook not found or not scheduled")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_exploratory_schedule(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<Json<SchedulerJobData>> {
    Ok(Json(state.services.scheduler.get_for_exploratory(&user, &project, &name).await?))
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/exploratory_environment/scheduler/{project}/{name}/{computational}",
    tag = "scheduler",
    summary = "Set Spark cluster schedule",
    params(("project" = String, Path), ("name" = String, Path), ("computational" = String, Path)),
    request_body = SchedulerJobData,
    responses(
        (status = 200, description = "Schedule saved"),
        (status = 400, description = "Cloud managed clusters cannot be scheduled"),
        (status = 404, description = "Cluster not found"),
        (status = 422, description = "Invalid schedule")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn set_computational_schedule(
    State(state): State<AppState>,
    Path((project, name, computational)): Path<(String, String, String)>,
    user: CurrentUser,
    Json(data): Json<SchedulerJobData>,
) -> Result<StatusCode> {
    state
        .services
        .scheduler
        .update_for_computational(&user, &project, &name, &computational, data)
        .await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/infrastructure_provision/exploratory_environment/scheduler/{project}/{name}/{computational}",
    tag = "scheduler",
    summary = "Get Spark cluster schedule",
    params(("project" = String, Path), ("name" = String, Path), ("computational" = String, Path)),
    responses(
        (status = 200, description = "The schedule", body = SchedulerJobData),
        (status = 404, description = "Cluster not found or not scheduled")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_computational_schedule(
    State(state): State<AppState>,
    Path((project, name, computational)): Path<(String, String, String)>,
    user: CurrentUser,
) -> Result<Json<SchedulerJobData>> {
    let data = state
        .services
        .scheduler
        .get_for_computational(&user, &project, &name, &computational)
        .await?;
    Ok(Json(data))
}
