//! Backup requests.

use crate::db::errors::{DbError, Result};
use crate::db::handlers::computational::affected;
use crate::db::models::backups::{Backup, BackupRequest, BackupStatus};
use crate::types::{BackupId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

#[async_trait::async_trait]
pub trait BackupDao: Send + Sync {
    async fn insert(&self, backup: &Backup) -> Result<()>;

    async fn get(&self, user: &str, id: BackupId) -> Result<Option<Backup>>;

    /// A user's backups, newest first.
    async fn list(&self, user: &str) -> Result<Vec<Backup>>;

    async fn update_status(&self, id: BackupId, status: BackupStatus, file_name: Option<&str>, error_message: Option<&str>) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct BackupRow {
    id: BackupId,
    user_name: String,
    request: Json<BackupRequest>,
    status: String,
    file_name: Option<String>,
    error_message: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BackupRow> for Backup {
    type Error = DbError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(Self {
            status: BackupStatus::parse(&row.status)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown backup status '{}'", row.status)))?,
            id: row.id,
            user: row.user_name,
            request: row.request.0,
            file_name: row.file_name,
            error_message: row.error_message,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgBackups {
    pool: PgPool,
}

impl PgBackups {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BackupDao for PgBackups {
    #[instrument(skip(self, backup), fields(backup_id = %abbrev_uuid(&backup.id)), err)]
    async fn insert(&self, backup: &Backup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (id, user_name, request, status, file_name, error_message, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(backup.id)
        .bind(&backup.user)
        .bind(Json(&backup.request))
        .bind(backup.status.as_str())
        .bind(&backup.file_name)
        .bind(&backup.error_message)
        .bind(backup.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(backup_id = %abbrev_uuid(&id)), err)]
    async fn get(&self, user: &str, id: BackupId) -> Result<Option<Backup>> {
        let row = sqlx::query_as::<_, BackupRow>("SELECT * FROM backups WHERE id = $1 AND user_name = $2")
            .bind(id)
            .bind(user)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, user: &str) -> Result<Vec<Backup>> {
        let rows = sqlx::query_as::<_, BackupRow>("SELECT * FROM backups WHERE user_name = $1 ORDER BY updated_at DESC")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(backup_id = %abbrev_uuid(&id)), err)]
    async fn update_status(&self, id: BackupId, status: BackupStatus, file_name: Option<&str>, error_message: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE backups
            SET status = $2, file_name = COALESCE($3, file_name), error_message = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(file_name)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        affected(result.rows_affected())
    }
}
