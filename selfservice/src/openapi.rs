//! OpenAPI documentation for the `/api` surface.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Bearer schemes for users and for the provisioning service's callbacks.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "User token issued by the identity provider. Members of the admin group may use admin endpoints.",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "CallbackToken".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Shared secret configured as `auth.callback_token`."))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DataLab self-service API",
        description = "Manage notebooks, clusters, projects and endpoints of a DataLab installation."
    ),
    servers(
        (url = "/api", description = "Self-service API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::exploratories::create_exploratory,
        api::handlers::exploratories::start_exploratory,
        api::handlers::exploratories::stop_exploratory,
        api::handlers::exploratories::terminate_exploratory,
        api::handlers::exploratories::reconfigure_exploratory,
        api::handlers::exploratories::create_image,
        api::handlers::exploratories::get_exploratory,
        api::handlers::exploratories::list_exploratories,
        api::handlers::computational::create_spark_cluster,
        api::handlers::computational::create_cloud_cluster,
        api::handlers::computational::start_computational,
        api::handlers::computational::stop_computational,
        api::handlers::computational::terminate_computational,
        api::handlers::computational::reconfigure_computational,
        api::handlers::computational::get_computational,
        api::handlers::libraries::install_libraries,
        api::handlers::libraries::list_libraries,
        api::handlers::libraries::list_lib_groups,
        api::handlers::scheduler::set_exploratory_schedule,
        api::handlers::scheduler::get_exploratory_schedule,
        api::handlers::scheduler::set_computational_schedule,
        api::handlers::scheduler::get_computational_schedule,
        api::handlers::projects::create_project,
        api::handlers::projects::list_projects,
        api::handlers::projects::get_project,
        api::handlers::projects::update_project,
        api::handlers::projects::update_budget,
        api::handlers::projects::start_project_endpoint,
        api::handlers::projects::stop_project_endpoint,
        api::handlers::projects::terminate_project_endpoint,
        api::handlers::endpoints::create_endpoint,
        api::handlers::endpoints::list_endpoints,
        api::handlers::endpoints::get_endpoint,
        api::handlers::endpoints::delete_endpoint,
        api::handlers::endpoints::endpoint_health,
        api::handlers::billing::billing_report,
        api::handlers::billing::billing_report_query,
        api::handlers::billing::project_quota,
        api::handlers::environment::infrastructure_info,
        api::handlers::environment::all_resources,
        api::handlers::environment::stop_user_environment,
        api::handlers::backups::create_backup,
        api::handlers::backups::list_backups,
        api::handlers::backups::get_backup,
        api::handlers::audit::list_audit,
        api::handlers::callbacks::exploratory_callback,
        api::handlers::callbacks::computational_callback,
        api::handlers::callbacks::library_callback,
        api::handlers::callbacks::project_callback,
        api::handlers::callbacks::backup_callback,
        api::handlers::callbacks::status_callback,
    ),
    components(
        schemas(
            api::models::accepted::AcceptedResponse,
            api::models::exploratories::ExploratoryCreateRequest,
            api::models::exploratories::ExploratoryResponse,
            api::models::computational::SparkClusterCreateRequest,
            api::models::computational::CloudClusterCreateRequest,
            api::models::computational::ComputationalResponse,
            api::models::libraries::LibraryInstallRequest,
            api::models::projects::ProjectCreateRequest,
            api::models::projects::ProjectResponse,
            api::models::endpoints::EndpointCreateRequest,
            api::models::endpoints::EndpointResponse,
            api::models::billing::QuotaResponse,
            api::models::environment::InfrastructureInfo,
            api::models::environment::EnvironmentResponse,
            crate::status::UserInstanceStatus,
            crate::types::CloudProvider,
            crate::types::ComputationalKind,
            crate::db::models::billing::BillingReport,
            crate::db::models::libraries::Library,
            crate::db::models::scheduler::SchedulerJobData,
            crate::db::models::backups::Backup,
            crate::db::models::audit::AuditEntry,
        )
    ),
    tags(
        (name = "exploratory", description = "Notebook lifecycle"),
        (name = "computational", description = "Spark and cloud-managed clusters"),
        (name = "libraries", description = "Library installation"),
        (name = "scheduler", description = "Start, stop and terminate schedules"),
        (name = "projects", description = "Projects, budgets and edges"),
        (name = "endpoints", description = "Provisioning endpoint registry"),
        (name = "billing", description = "Cost reports and quota"),
        (name = "environment", description = "Resource overviews"),
        (name = "backups", description = "Self-service node backups"),
        (name = "audit", description = "Audit log"),
        (name = "callbacks", description = "Status reports from the provisioning service"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_documented_path_is_secured() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.len() > 30);
        for (path, item) in &doc.paths.paths {
            let operations = [&item.get, &item.post, &item.put, &item.delete, &item.patch];
            for operation in operations.into_iter().flatten() {
                assert!(operation.security.is_some(), "{path} has no security requirement");
            }
        }
    }

    #[test]
    fn test_security_schemes_registered() {
        let doc = ApiDoc::openapi();
        let schemes = &doc.components.expect("components").security_schemes;
        assert!(schemes.contains_key("BearerAuth"));
        assert!(schemes.contains_key("CallbackToken"));
    }

    #[test]
    fn test_identifier_fields_are_uuid_strings() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schemas = &doc["components"]["schemas"];
        for (schema, field) in [
            ("ExploratoryStatusCallback", "request_id"),
            ("BackupStatusCallback", "id"),
            ("EnvironmentStatusCallback", "request_id"),
            ("AuditEntry", "id"),
            ("Backup", "id"),
        ] {
            let property = &schemas[schema]["properties"][field];
            assert_eq!(property["type"], "string", "{schema}.{field}");
            assert_eq!(property["format"], "uuid", "{schema}.{field}");
        }
    }
}
