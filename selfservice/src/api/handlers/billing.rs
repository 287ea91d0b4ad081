use crate::AppState;
use crate::api::models::billing::{BillingReportQuery, BillingReportRequest, QuotaResponse};
use crate::auth::CurrentUser;
use crate::db::models::billing::{BillingFilter, BillingReport};
use crate::errors::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
};

/// Non-admins only ever see their own costs.
fn scoped(mut filter: BillingFilter, user: &CurrentUser) -> BillingFilter {
    if !user.is_admin {
        filter.users = vec![user.name.clone()];
    }
    filter
}

#[utoipa::path(
    post,
    path = "/billing/report",
    tag = "billing",
    summary = "Billing report",
    request_body = BillingReportRequest,
    responses((status = 200, description = "Matching cost lines and their total", body = BillingReport)),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn billing_report(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<BillingReportRequest>,
) -> Result<Json<BillingReport>> {
    let filter = scoped(request.into(), &user);
    Ok(Json(state.services.billing.report(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/billing/report",
    tag = "billing",
    summary = "Billing report from query parameters",
    params(BillingReportQuery),
    responses((status = 200, description = "Matching cost lines and their total", body = BillingReport)),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn billing_report_query(
    State(state): State<AppState>,
    Query(query): Query<BillingReportQuery>,
    user: CurrentUser,
) -> Result<Json<BillingReport>> {
    let filter = scoped(query.into(), &user);
    Ok(Json(state.services.billing.report(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/billing/quota/{project}",
    tag = "billing",
    summary = "Project budget usage",
    params(("project" = String, Path)),
    responses(
        (status = 200, description = "Budget usage", body = QuotaResponse),
        (status = 403, description = "Not a member of the project"),
        (status = 404, description = "Project not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn project_quota(State(state): State<AppState>, Path(project): Path<String>, user: CurrentUser) -> Result<Json<QuotaResponse>> {
    state.services.project.check_membership(&user, &project).await?;
    let quota_used = state.services.billing.project_quota_used(&project).await?;
    Ok(Json(QuotaResponse {
        project,
        quota_reached: quota_used.is_some_and(|used| used >= 100.0),
        quota_used,
    }))
}
