//! Cluster records.

use crate::db::errors::{DbError, Result};
use crate::db::models::computational::{ComputationalCreateDBRequest, ComputationalFieldsUpdate, ComputationalResource};
use crate::db::models::exploratories::{ClusterConfig, ResourceUrl};
use crate::db::models::libraries::Library;
use crate::db::models::scheduler::SchedulerJobData;
use crate::status::UserInstanceStatus;
use crate::types::{ComputationalId, ComputationalKind, ExploratoryId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait ComputationalDao: Send + Sync {
    /// Insert a cluster in CREATING. Fails with a unique violation if the notebook already has a
    /// cluster of that name.
    async fn insert(&self, exploratory_id: ExploratoryId, request: &ComputationalCreateDBRequest) -> Result<ComputationalResource>;

    /// Reuse a terminated or failed cluster record for a new cluster of the same name.
    async fn recreate(&self, id: ComputationalId, request: &ComputationalCreateDBRequest) -> Result<ComputationalResource>;

    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<ComputationalResource>>;

    async fn list_for_exploratories(&self, exploratory_ids: &[ExploratoryId]) -> Result<Vec<ComputationalResource>>;

    async fn update_status(&self, id: ComputationalId, status: UserInstanceStatus) -> Result<()>;

    /// Move every cluster of a notebook to `spark_status` or `cloud_status` by kind, skipping
    /// clusters whose current status is in `excluded`. Returns the number of clusters changed.
    async fn cascade_status(
        &self,
        exploratory_id: ExploratoryId,
        spark_status: UserInstanceStatus,
        cloud_status: UserInstanceStatus,
        excluded: &[UserInstanceStatus],
    ) -> Result<u64>;

    async fn update_fields(&self, id: ComputationalId, update: &ComputationalFieldsUpdate) -> Result<()>;

    async fn update_config(&self, id: ComputationalId, config: &[ClusterConfig]) -> Result<()>;

    async fn update_libs(&self, id: ComputationalId, libs: &[Library]) -> Result<()>;

    async fn update_scheduler(&self, id: ComputationalId, data: Option<&SchedulerJobData>) -> Result<()>;
}

#[derive(Debug, FromRow)]
pub(crate) struct ComputationalRow {
    id: Uuid,
    exploratory_id: Uuid,
    computational_name: String,
    resource_type: String,
    image: String,
    status: String,
    instance_id: Option<String>,
    master_shape: String,
    slave_shape: Option<String>,
    total_instance_number: i32,
    version: Option<String>,
    resource_url: Json<Vec<ResourceUrl>>,
    config: Json<Vec<ClusterConfig>>,
    libs: Json<Vec<Library>>,
    scheduler_data: Option<Json<SchedulerJobData>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

pub(crate) fn parse_status(s: &str) -> Result<UserInstanceStatus> {
    UserInstanceStatus::parse(s).ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown status '{s}' in store")))
}

impl TryFrom<ComputationalRow> for ComputationalResource {
    type Error = DbError;

    fn try_from(row: ComputationalRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            exploratory_id: row.exploratory_id,
            computational_name: row.computational_name,
            resource_type: ComputationalKind::from_db_string(&row.resource_type)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown cluster type '{}'", row.resource_type)))?,
            image: row.image,
            status: parse_status(&row.status)?,
            instance_id: row.instance_id,
            master_shape: row.master_shape,
            slave_shape: row.slave_shape,
            total_instance_number: row.total_instance_number,
            version: row.version,
            resource_url: row.resource_url.0,
            config: row.config.0,
            libs: row.libs.0,
            scheduler_data: row.scheduler_data.map(|j| j.0),
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn statuses_as_text(statuses: &[UserInstanceStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub(crate) fn affected(rows: u64) -> Result<()> {
    if rows == 0 { Err(DbError::NotFound) } else { Ok(()) }
}

pub struct PgComputational {
    pool: PgPool,
}

impl PgComputational {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ComputationalDao for PgComputational {
    #[instrument(skip(self, request), fields(exploratory_id = %abbrev_uuid(&exploratory_id), name = %request.computational_name), err)]
    async fn insert(&self, exploratory_id: ExploratoryId, request: &ComputationalCreateDBRequest) -> Result<ComputationalResource> {
        let row = sqlx::query_as::<_, ComputationalRow>(
            r#"
            INSERT INTO computational_resources
                (id, exploratory_id, computational_name, resource_type, image, status, master_shape, slave_shape,
                 total_instance_number, version, config)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(exploratory_id)
        .bind(&request.computational_name)
        .bind(request.resource_type.as_str())
        .bind(&request.image)
        .bind(UserInstanceStatus::Creating.as_str())
        .bind(&request.master_shape)
        .bind(&request.slave_shape)
        .bind(request.total_instance_number)
        .bind(&request.version)
        .bind(Json(&request.config))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self, request), fields(computational_id = %abbrev_uuid(&id)), err)]
    async fn recreate(&self, id: ComputationalId, request: &ComputationalCreateDBRequest) -> Result<ComputationalResource> {
        let row = sqlx::query_as::<_, ComputationalRow>(
            r#"
            UPDATE computational_resources
            SET resource_type = $2, image = $3, status = $4, master_shape = $5, slave_shape = $6,
                total_instance_number = $7, version = $8, config = $9, instance_id = NULL,
                resource_url = '[]', libs = '[]', scheduler_data = NULL, error_message = NULL,
                created_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('terminated', 'failed')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.resource_type.as_str())
        .bind(&request.image)
        .bind(UserInstanceStatus::Creating.as_str())
        .bind(&request.master_shape)
        .bind(&request.slave_shape)
        .bind(request.total_instance_number)
        .bind(&request.version)
        .bind(Json(&request.config))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(DbError::NotFound)?.try_into()
    }

    #[instrument(skip(self), err)]
    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<ComputationalResource>> {
        let row = sqlx::query_as::<_, ComputationalRow>("SELECT * FROM computational_resources WHERE instance_id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self, exploratory_ids), fields(count = exploratory_ids.len()), err)]
    async fn list_for_exploratories(&self, exploratory_ids: &[ExploratoryId]) -> Result<Vec<ComputationalResource>> {
        if exploratory_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ComputationalRow>(
            "SELECT * FROM computational_resources WHERE exploratory_id = ANY($1) ORDER BY created_at",
        )
        .bind(exploratory_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(computational_id = %abbrev_uuid(&id)), err)]
    async fn update_status(&self, id: ComputationalId, status: UserInstanceStatus) -> Result<()> {
        let result = sqlx::query("UPDATE computational_resources SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self), fields(exploratory_id = %abbrev_uuid(&exploratory_id)), err)]
    async fn cascade_status(
        &self,
        exploratory_id: ExploratoryId,
        spark_status: UserInstanceStatus,
        cloud_status: UserInstanceStatus,
        excluded: &[UserInstanceStatus],
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE computational_resources
            SET status = CASE WHEN resource_type = $2 THEN $3 ELSE $4 END, updated_at = NOW()
            WHERE exploratory_id = $1 AND NOT (status = ANY($5))
            "#,
        )
        .bind(exploratory_id)
        .bind(ComputationalKind::Spark.as_str())
        .bind(spark_status.as_str())
        .bind(cloud_status.as_str())
        .bind(statuses_as_text(excluded))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, update), fields(computational_id = %abbrev_uuid(&id)), err)]
    async fn update_fields(&self, id: ComputationalId, update: &ComputationalFieldsUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE computational_resources
            SET instance_id = COALESCE($2, instance_id),
                resource_url = COALESCE($3, resource_url),
                error_message = COALESCE($4, error_message),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.instance_id)
        .bind(update.resource_url.as_ref().map(Json))
        .bind(&update.error_message)
        .execute(&self.pool)
        .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, config), fields(computational_id = %abbrev_uuid(&id)), err)]
    async fn update_config(&self, id: ComputationalId, config: &[ClusterConfig]) -> Result<()> {
        let result = sqlx::query("UPDATE computational_resources SET config = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(Json(config))
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, libs), fields(computational_id = %abbrev_uuid(&id), count = libs.len()), err)]
    async fn update_libs(&self, id: ComputationalId, libs: &[Library]) -> Result<()> {
        let result = sqlx::query("UPDATE computational_resources SET libs = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(Json(libs))
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, data), fields(computational_id = %abbrev_uuid(&id)), err)]
    async fn update_scheduler(&self, id: ComputationalId, data: Option<&SchedulerJobData>) -> Result<()> {
        let result = sqlx::query("UPDATE computational_resources SET scheduler_data = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(data.map(Json))
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }
}
