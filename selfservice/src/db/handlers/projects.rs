//! Project records.

use crate::db::errors::Result;
use crate::db::handlers::computational::affected;
use crate::db::models::projects::{Budget, Project, ProjectCreateDBRequest, ProjectEndpoint};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

#[async_trait::async_trait]
pub trait ProjectDao: Send + Sync {
    async fn insert(&self, request: &ProjectCreateDBRequest) -> Result<Project>;

    async fn get(&self, name: &str) -> Result<Option<Project>>;

    async fn list(&self) -> Result<Vec<Project>>;

    /// Replace groups, endpoints, budget and the shared image flag.
    async fn update(&self, project: &Project) -> Result<()>;

    /// Replace the entry for `endpoint.name` only, leaving other endpoints untouched.
    async fn update_endpoint(&self, project: &str, endpoint: &ProjectEndpoint) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    name: String,
    groups: Vec<String>,
    endpoints: Json<Vec<ProjectEndpoint>>,
    budget: Json<Budget>,
    shared_image_enabled: bool,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            name: row.name,
            groups: row.groups.into_iter().collect(),
            endpoints: row.endpoints.0,
            budget: row.budget.0,
            shared_image_enabled: row.shared_image_enabled,
            created_at: row.created_at,
        }
    }
}

pub struct PgProjects {
    pool: PgPool,
}

impl PgProjects {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProjectDao for PgProjects {
    #[instrument(skip(self, request), fields(project = %request.name), err)]
    async fn insert(&self, request: &ProjectCreateDBRequest) -> Result<Project> {
        let groups: Vec<String> = request.groups.iter().cloned().collect();
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (name, groups, endpoints, budget, shared_image_enabled)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(groups)
        .bind(Json(&request.endpoints))
        .bind(Json(&request.budget))
        .bind(request.shared_image_enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, project), fields(project = %project.name), err)]
    async fn update(&self, project: &Project) -> Result<()> {
        let groups: Vec<String> = project.groups.iter().cloned().collect();
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET groups = $2, endpoints = $3, budget = $4, shared_image_enabled = $5
            WHERE name = $1
            "#,
        )
        .bind(&project.name)
        .bind(groups)
        .bind(Json(&project.endpoints))
        .bind(Json(&project.budget))
        .bind(project.shared_image_enabled)
        .execute(&self.pool)
        .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.name, status = %endpoint.status), err)]
    async fn update_endpoint(&self, project: &str, endpoint: &ProjectEndpoint) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET endpoints = COALESCE(
                (SELECT jsonb_agg(CASE WHEN e->>'name' = $2 THEN $3::jsonb ELSE e END)
                 FROM jsonb_array_elements(endpoints) AS e),
                '[]'::jsonb)
            WHERE name = $1 AND endpoints @> jsonb_build_array(jsonb_build_object('name', $2::text))
            "#,
        )
        .bind(project)
        .bind(&endpoint.name)
        .bind(Json(endpoint))
        .execute(&self.pool)
        .await?;

        affected(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::db::models::projects::EdgeInfo;
    use crate::status::UserInstanceStatus;
    use std::collections::BTreeSet;

    fn edge(name: &str, status: UserInstanceStatus) -> ProjectEndpoint {
        ProjectEndpoint {
            name: name.to_string(),
            status,
            edge_info: None,
        }
    }

    fn request(name: &str) -> ProjectCreateDBRequest {
        ProjectCreateDBRequest {
            name: name.to_string(),
            groups: BTreeSet::from(["ds".to_string(), "admins".to_string()]),
            endpoints: vec![edge("local", UserInstanceStatus::Creating), edge("remote", UserInstanceStatus::Creating)],
            budget: Budget {
                value: Some(100),
                monthly_budget: true,
            },
            shared_image_enabled: true,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_insert_round_trips_and_rejects_duplicates(pool: PgPool) {
        let dao = PgProjects::new(pool);
        let created = dao.insert(&request("ds")).await.unwrap();
        assert_eq!(created.groups, request("ds").groups);

        let stored = dao.get("ds").await.unwrap().unwrap();
        assert_eq!(stored.endpoints, request("ds").endpoints);
        assert_eq!(stored.budget, request("ds").budget);
        assert!(stored.shared_image_enabled);

        let err = dao.insert(&request("ds")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert!(dao.get("ml").await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_endpoint_replaces_only_that_entry(pool: PgPool) {
        let dao = PgProjects::new(pool);
        dao.insert(&request("ds")).await.unwrap();

        let running = ProjectEndpoint {
            edge_info: Some(EdgeInfo {
                public_ip: Some("54.1.2.3".to_string()),
                ..Default::default()
            }),
            ..edge("remote", UserInstanceStatus::Running)
        };
        dao.update_endpoint("ds", &running).await.unwrap();

        let stored = dao.get("ds").await.unwrap().unwrap();
        assert_eq!(stored.endpoints, vec![edge("local", UserInstanceStatus::Creating), running]);

        let err = dao.update_endpoint("ds", &edge("nowhere", UserInstanceStatus::Running)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
        let err = dao.update_endpoint("ml", &edge("local", UserInstanceStatus::Running)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_and_list(pool: PgPool) {
        let dao = PgProjects::new(pool);
        dao.insert(&request("ml")).await.unwrap();
        let mut project = dao.insert(&request("ds")).await.unwrap();

        project.groups = BTreeSet::from(["analysts".to_string()]);
        project.budget = Budget::default();
        project.endpoints.push(edge("edge3", UserInstanceStatus::Creating));
        dao.update(&project).await.unwrap();

        let names: Vec<_> = dao.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["ds", "ml"]);
        let stored = dao.get("ds").await.unwrap().unwrap();
        assert_eq!(stored.groups, project.groups);
        assert_eq!(stored.budget.limit(), None);
        assert_eq!(stored.endpoints.len(), 3);
    }
}
