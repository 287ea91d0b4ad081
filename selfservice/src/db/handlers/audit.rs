//! Audit log.

use crate::db::errors::{DbError, Result};
use crate::db::models::audit::{AuditAction, AuditCreateDBRequest, AuditEntry, AuditFilter, AuditResourceType};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait AuditDao: Send + Sync {
    async fn insert(&self, request: &AuditCreateDBRequest) -> Result<AuditEntry>;

    /// Page of entries matching the filter, newest first, with the total number of matches.
    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditEntry>, i64)>;
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    user_name: String,
    action: String,
    project: Option<String>,
    resource_name: String,
    resource_type: String,
    info: Option<String>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(Self {
            action: AuditAction::from_db_string(&row.action)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown audit action '{}'", row.action)))?,
            resource_type: AuditResourceType::from_db_string(&row.resource_type)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown audit resource type '{}'", row.resource_type)))?,
            id: row.id,
            user: row.user_name,
            project: row.project,
            resource_name: row.resource_name,
            info: row.info,
            timestamp: row.timestamp,
        })
    }
}

const AUDIT_WHERE: &str = r#"
    WHERE (cardinality($1::text[]) = 0 OR user_name = ANY($1))
      AND (cardinality($2::text[]) = 0 OR project = ANY($2))
      AND (cardinality($3::text[]) = 0 OR resource_name = ANY($3))
      AND ($4::date IS NULL OR timestamp >= $4::date)
      AND ($5::date IS NULL OR timestamp < $5::date + 1)
"#;

pub struct PgAudit {
    pool: PgPool,
}

impl PgAudit {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditDao for PgAudit {
    #[instrument(skip(self, request), fields(user = %request.user, action = %request.action), err)]
    async fn insert(&self, request: &AuditCreateDBRequest) -> Result<AuditEntry> {
        let row = sqlx::query_as::<_, AuditRow>(
            r#"
            INSERT INTO audit_entries (id, user_name, action, project, resource_name, resource_type, info)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.user)
        .bind(request.action.as_str())
        .bind(&request.project)
        .bind(&request.resource_name)
        .bind(request.resource_type.as_str())
        .bind(&request.info)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditEntry>, i64)> {
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM audit_entries {AUDIT_WHERE}"))
            .bind(&filter.users)
            .bind(&filter.projects)
            .bind(&filter.resource_names)
            .bind(filter.date_start)
            .bind(filter.date_end)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT * FROM audit_entries {AUDIT_WHERE} ORDER BY timestamp DESC OFFSET $6 LIMIT $7"
        ))
        .bind(&filter.users)
        .bind(&filter.projects)
        .bind(&filter.resource_names)
        .bind(filter.date_start)
        .bind(filter.date_end)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows.into_iter().map(TryInto::try_into).collect::<Result<Vec<_>>>()?;
        Ok((entries, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: &str, project: &str, resource: &str) -> AuditCreateDBRequest {
        AuditCreateDBRequest {
            user: user.to_string(),
            action: AuditAction::Start,
            project: Some(project.to_string()),
            resource_name: resource.to_string(),
            resource_type: AuditResourceType::Notebook,
            info: None,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_filters_and_pages(pool: PgPool) {
        let dao = PgAudit::new(pool);
        for i in 0..3 {
            dao.insert(&entry("alice", "ds", &format!("nb{i}"))).await.unwrap();
        }
        let bob = dao.insert(&entry("bob", "ml", "nb0")).await.unwrap();
        assert_eq!(bob.action, AuditAction::Start);
        assert_eq!(bob.resource_type, AuditResourceType::Notebook);

        let (entries, total) = dao.list(&AuditFilter::default()).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(entries.len(), 4);
        assert!(entries.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let filter = AuditFilter {
            users: vec!["alice".to_string()],
            skip: 1,
            limit: 1,
            ..Default::default()
        };
        let (entries, total) = dao.list(&filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user, "alice");

        let filter = AuditFilter {
            projects: vec!["ml".to_string()],
            resource_names: vec!["nb0".to_string()],
            ..Default::default()
        };
        let (entries, total) = dao.list(&filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].id, bob.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_by_day(pool: PgPool) {
        let dao = PgAudit::new(pool);
        let recorded = dao.insert(&entry("alice", "ds", "nb")).await.unwrap();
        let today = recorded.timestamp.date_naive();

        let filter = AuditFilter {
            date_start: Some(today),
            date_end: Some(today),
            ..Default::default()
        };
        assert_eq!(dao.list(&filter).await.unwrap().1, 1);

        let filter = AuditFilter {
            date_start: today.succ_opt(),
            ..Default::default()
        };
        assert_eq!(dao.list(&filter).await.unwrap().1, 0);
    }
}
