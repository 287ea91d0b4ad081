use crate::AppState;
use crate::api::models::audit::ListAuditQuery;
use crate::api::models::pagination::PaginatedResponse;
use crate::auth::RequireAdmin;
use crate::db::models::audit::{AuditEntry, AuditFilter};
use crate::errors::Result;
use axum::{
    Json,
    extract::{Query, State},
};

#[utoipa::path(
    get,
    path = "/audit",
    tag = "audit",
    summary = "List audit entries",
    params(ListAuditQuery),
    responses(
        (status = 200, description = "Audit entries, newest first", body = PaginatedResponse<AuditEntry>),
        (status = 403, description = "Admin only")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<ListAuditQuery>,
    _: RequireAdmin,
) -> Result<Json<PaginatedResponse<AuditEntry>>> {
    let filter = AuditFilter::from(&query);
    let (entries, total_count) = state.services.audit.list(&filter).await?;
    Ok(Json(PaginatedResponse::new(entries, total_count, filter.skip, filter.limit)))
}

#[cfg(test)]
mod tests {
    use crate::api::models::pagination::PaginatedResponse;
    use crate::db::models::audit::{AuditAction, AuditEntry};
    use crate::test_utils::TestEnv;

    #[test_log::test(tokio::test)]
    async fn test_actions_are_audited() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let server = env.server();

        server
            .delete("/api/infrastructure_provision/exploratory_environment/ds/nb/stop")
            .add_header("authorization", env.bearer(&env.user("alice")))
            .await
            .assert_status(axum::http::StatusCode::ACCEPTED);

        let page: PaginatedResponse<AuditEntry> = server
            .get("/api/audit")
            .add_query_param("users", "alice")
            .add_header("authorization", env.bearer(&env.admin()))
            .await
            .json();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.data[0].action, AuditAction::Stop);
        assert_eq!(page.data[0].resource_name, "nb");
    }
}
