//! Registered endpoints.

use crate::db::errors::{DbError, Result};
use crate::db::handlers::computational::affected;
use crate::db::models::endpoints::{Endpoint, EndpointCreateDBRequest, EndpointStatus};
use crate::types::CloudProvider;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

#[async_trait::async_trait]
pub trait EndpointDao: Send + Sync {
    /// Register an endpoint. Name and URL are both unique.
    async fn insert(&self, request: &EndpointCreateDBRequest) -> Result<Endpoint>;

    async fn get(&self, name: &str) -> Result<Option<Endpoint>>;

    async fn list(&self) -> Result<Vec<Endpoint>>;

    /// Returns whether a record was removed.
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn update_status(&self, name: &str, status: EndpointStatus) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct EndpointRow {
    name: String,
    url: String,
    account: String,
    tag: Option<String>,
    cloud_provider: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EndpointRow> for Endpoint {
    type Error = DbError;

    fn try_from(row: EndpointRow) -> Result<Self> {
        Ok(Self {
            url: row.url.parse().map_err(|e| DbError::Other(anyhow::anyhow!("invalid endpoint url '{}': {e}", row.url)))?,
            cloud_provider: CloudProvider::from_db_string(&row.cloud_provider)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown cloud provider '{}'", row.cloud_provider)))?,
            status: EndpointStatus::from_db_string(&row.status)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown endpoint status '{}'", row.status)))?,
            name: row.name,
            account: row.account,
            tag: row.tag,
            created_at: row.created_at,
        })
    }
}

pub struct PgEndpoints {
    pool: PgPool,
}

impl PgEndpoints {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EndpointDao for PgEndpoints {
    #[instrument(skip(self, request), fields(name = %request.name, url = %request.url), err)]
    async fn insert(&self, request: &EndpointCreateDBRequest) -> Result<Endpoint> {
        let row = sqlx::query_as::<_, EndpointRow>(
            r#"
            INSERT INTO endpoints (name, url, account, tag, cloud_provider, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(request.url.as_str())
        .bind(&request.account)
        .bind(&request.tag)
        .bind(request.cloud_provider.as_str())
        .bind(EndpointStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), err)]
    async fn get(&self, name: &str) -> Result<Option<Endpoint>> {
        let row = sqlx::query_as::<_, EndpointRow>("SELECT * FROM endpoints WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Endpoint>> {
        let rows = sqlx::query_as::<_, EndpointRow>("SELECT * FROM endpoints ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM endpoints WHERE name = $1").bind(name).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn update_status(&self, name: &str, status: EndpointStatus) -> Result<()> {
        let result = sqlx::query("UPDATE endpoints SET status = $2 WHERE name = $1")
            .bind(name)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::endpoint_request;

    #[sqlx::test]
    #[test_log::test]
    async fn test_insert_enforces_unique_name_and_url(pool: PgPool) {
        let dao = PgEndpoints::new(pool);
        let endpoint = dao.insert(&endpoint_request("local")).await.unwrap();
        assert_eq!(endpoint.status, EndpointStatus::Active);
        assert_eq!(endpoint.url.as_str(), "http://local.example.com/");

        let err = dao.insert(&endpoint_request("local")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        let same_url = EndpointCreateDBRequest {
            name: "other".to_string(),
            ..endpoint_request("local")
        };
        match dao.insert(&same_url).await.unwrap_err() {
            DbError::UniqueViolation { constraint, .. } => assert_eq!(constraint.as_deref(), Some("endpoints_url_unique")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_status_and_delete(pool: PgPool) {
        let dao = PgEndpoints::new(pool);
        dao.insert(&endpoint_request("remote")).await.unwrap();
        dao.insert(&endpoint_request("local")).await.unwrap();

        dao.update_status("local", EndpointStatus::Inactive).await.unwrap();
        assert_eq!(dao.get("local").await.unwrap().unwrap().status, EndpointStatus::Inactive);
        assert!(matches!(
            dao.update_status("nowhere", EndpointStatus::Active).await.unwrap_err(),
            DbError::NotFound
        ));

        let names: Vec<_> = dao.list().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["local", "remote"]);

        assert!(dao.delete("local").await.unwrap());
        assert!(!dao.delete("local").await.unwrap());
        assert!(dao.get("local").await.unwrap().is_none());
    }
}
