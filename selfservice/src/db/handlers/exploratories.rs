//! Notebook records.
//!
//! Reads return the notebook with its clusters attached, so callers always see the parent and
//! children together.

use crate::db::errors::{DbError, Result};
use crate::db::handlers::computational::{ComputationalDao, PgComputational, affected, parse_status};
use crate::db::models::exploratories::{ClusterConfig, Exploratory, ExploratoryCreateDBRequest, ExploratoryFieldsUpdate, ExploratoryFilter, ResourceUrl};
use crate::db::models::libraries::Library;
use crate::db::models::scheduler::SchedulerJobData;
use crate::status::UserInstanceStatus;
use crate::types::{CloudProvider, ExploratoryId, ExploratoryKey, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeMap, HashMap};
use tracing::instrument;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait ExploratoryDao: Send + Sync {
    /// Insert a notebook in CREATING. Fails with a unique violation if the user already has a
    /// notebook of that name in the project.
    async fn insert(&self, request: &ExploratoryCreateDBRequest) -> Result<Exploratory>;

    /// Reuse a terminated or failed notebook record for a new notebook of the same name.
    async fn recreate(&self, id: ExploratoryId, request: &ExploratoryCreateDBRequest) -> Result<Exploratory>;

    async fn find(&self, key: &ExploratoryKey) -> Result<Option<Exploratory>>;

    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<Exploratory>>;

    async fn list(&self, filter: &ExploratoryFilter) -> Result<Vec<Exploratory>>;

    async fn update_status(&self, id: ExploratoryId, status: UserInstanceStatus) -> Result<()>;

    async fn update_fields(&self, id: ExploratoryId, update: &ExploratoryFieldsUpdate) -> Result<()>;

    async fn update_cluster_config(&self, id: ExploratoryId, config: &[ClusterConfig]) -> Result<()>;

    async fn update_libs(&self, id: ExploratoryId, libs: &[Library]) -> Result<()>;

    async fn update_scheduler(&self, id: ExploratoryId, data: Option<&SchedulerJobData>) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct ExploratoryRow {
    id: Uuid,
    user_name: String,
    project: String,
    endpoint: String,
    exploratory_name: String,
    template_name: String,
    image: String,
    shape: String,
    cloud_provider: String,
    status: String,
    instance_id: Option<String>,
    private_ip: Option<String>,
    exploratory_url: Json<Vec<ResourceUrl>>,
    tags: Json<BTreeMap<String, String>>,
    cluster_config: Json<Vec<ClusterConfig>>,
    libs: Json<Vec<Library>>,
    scheduler_data: Option<Json<SchedulerJobData>>,
    error_message: Option<String>,
    last_activity: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ExploratoryRow> for Exploratory {
    type Error = DbError;

    fn try_from(row: ExploratoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user: row.user_name,
            project: row.project,
            endpoint: row.endpoint,
            exploratory_name: row.exploratory_name,
            template_name: row.template_name,
            image: row.image,
            shape: row.shape,
            cloud_provider: CloudProvider::from_db_string(&row.cloud_provider)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown cloud provider '{}'", row.cloud_provider)))?,
            status: parse_status(&row.status)?,
            instance_id: row.instance_id,
            private_ip: row.private_ip,
            exploratory_url: row.exploratory_url.0,
            tags: row.tags.0,
            cluster_config: row.cluster_config.0,
            libs: row.libs.0,
            scheduler_data: row.scheduler_data.map(|j| j.0),
            error_message: row.error_message,
            last_activity: row.last_activity,
            created_at: row.created_at,
            updated_at: row.updated_at,
            computational_resources: Vec::new(),
        })
    }
}

pub struct PgExploratories {
    pool: PgPool,
    computational: PgComputational,
}

impl PgExploratories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            computational: PgComputational::new(pool.clone()),
            pool,
        }
    }

    /// Convert rows and attach each notebook's clusters.
    async fn with_clusters(&self, rows: Vec<ExploratoryRow>) -> Result<Vec<Exploratory>> {
        let mut records = rows.into_iter().map(Exploratory::try_from).collect::<Result<Vec<_>>>()?;
        let ids: Vec<ExploratoryId> = records.iter().map(|r| r.id).collect();

        let mut by_parent: HashMap<ExploratoryId, Vec<_>> = HashMap::new();
        for cluster in self.computational.list_for_exploratories(&ids).await? {
            by_parent.entry(cluster.exploratory_id).or_default().push(cluster);
        }
        for record in &mut records {
            record.computational_resources = by_parent.remove(&record.id).unwrap_or_default();
        }
        Ok(records)
    }

    async fn one(&self, row: Option<ExploratoryRow>) -> Result<Option<Exploratory>> {
        match row {
            Some(row) => Ok(self.with_clusters(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl ExploratoryDao for PgExploratories {
    #[instrument(skip(self, request), fields(user = %request.user, project = %request.project, name = %request.exploratory_name), err)]
    async fn insert(&self, request: &ExploratoryCreateDBRequest) -> Result<Exploratory> {
        let row = sqlx::query_as::<_, ExploratoryRow>(
            r#"
            INSERT INTO exploratories
                (id, user_name, project, endpoint, exploratory_name, template_name, image, shape, cloud_provider,
                 status, tags, cluster_config)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.user)
        .bind(&request.project)
        .bind(&request.endpoint)
        .bind(&request.exploratory_name)
        .bind(&request.template_name)
        .bind(&request.image)
        .bind(&request.shape)
        .bind(request.cloud_provider.as_str())
        .bind(UserInstanceStatus::Creating.as_str())
        .bind(Json(&request.tags))
        .bind(Json(&request.cluster_config))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self, request), fields(exploratory_id = %abbrev_uuid(&id)), err)]
    async fn recreate(&self, id: ExploratoryId, request: &ExploratoryCreateDBRequest) -> Result<Exploratory> {
        let row = sqlx::query_as::<_, ExploratoryRow>(
            r#"
            UPDATE exploratories
            SET endpoint = $2, template_name = $3, image = $4, shape = $5, cloud_provider = $6, status = $7,
                tags = $8, cluster_config = $9, instance_id = NULL, private_ip = NULL, exploratory_url = '[]',
                libs = '[]', scheduler_data = NULL, error_message = NULL, last_activity = NULL,
                created_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('terminated', 'failed')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.endpoint)
        .bind(&request.template_name)
        .bind(&request.image)
        .bind(&request.shape)
        .bind(request.cloud_provider.as_str())
        .bind(UserInstanceStatus::Creating.as_str())
        .bind(Json(&request.tags))
        .bind(Json(&request.cluster_config))
        .fetch_optional(&self.pool)
        .await?;

        self.one(row).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn find(&self, key: &ExploratoryKey) -> Result<Option<Exploratory>> {
        let row = sqlx::query_as::<_, ExploratoryRow>(
            "SELECT * FROM exploratories WHERE user_name = $1 AND project = $2 AND exploratory_name = $3",
        )
        .bind(&key.user)
        .bind(&key.project)
        .bind(&key.exploratory_name)
        .fetch_optional(&self.pool)
        .await?;

        self.one(row).await
    }

    #[instrument(skip(self), err)]
    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<Exploratory>> {
        let row = sqlx::query_as::<_, ExploratoryRow>("SELECT * FROM exploratories WHERE instance_id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;

        self.one(row).await
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &ExploratoryFilter) -> Result<Vec<Exploratory>> {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, ExploratoryRow>(
            r#"
            SELECT * FROM exploratories
            WHERE ($1::text IS NULL OR user_name = $1)
              AND ($2::text IS NULL OR project = $2)
              AND ($3::text IS NULL OR endpoint = $3)
              AND (cardinality($4::text[]) = 0 OR status = ANY($4))
              AND (NOT $5 OR scheduler_data IS NOT NULL)
            ORDER BY created_at
            "#,
        )
        .bind(&filter.user)
        .bind(&filter.project)
        .bind(&filter.endpoint)
        .bind(statuses)
        .bind(filter.with_scheduler)
        .fetch_all(&self.pool)
        .await?;

        self.with_clusters(rows).await
    }

    #[instrument(skip(self), fields(exploratory_id = %abbrev_uuid(&id)), err)]
    async fn update_status(&self, id: ExploratoryId, status: UserInstanceStatus) -> Result<()> {
        let result = sqlx::query("UPDATE exploratories SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, update), fields(exploratory_id = %abbrev_uuid(&id)), err)]
    async fn update_fields(&self, id: ExploratoryId, update: &ExploratoryFieldsUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE exploratories
            SET instance_id = COALESCE($2, instance_id),
                private_ip = COALESCE($3, private_ip),
                exploratory_url = COALESCE($4, exploratory_url),
                error_message = COALESCE($5, error_message),
                last_activity = COALESCE($6, last_activity),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.instance_id)
        .bind(&update.private_ip)
        .bind(update.exploratory_url.as_ref().map(Json))
        .bind(&update.error_message)
        .bind(update.last_activity)
        .execute(&self.pool)
        .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, config), fields(exploratory_id = %abbrev_uuid(&id)), err)]
    async fn update_cluster_config(&self, id: ExploratoryId, config: &[ClusterConfig]) -> Result<()> {
        let result = sqlx::query("UPDATE exploratories SET cluster_config = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(Json(config))
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, libs), fields(exploratory_id = %abbrev_uuid(&id), count = libs.len()), err)]
    async fn update_libs(&self, id: ExploratoryId, libs: &[Library]) -> Result<()> {
        let result = sqlx::query("UPDATE exploratories SET libs = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(Json(libs))
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }

    #[instrument(skip(self, data), fields(exploratory_id = %abbrev_uuid(&id)), err)]
    async fn update_scheduler(&self, id: ExploratoryId, data: Option<&SchedulerJobData>) -> Result<()> {
        let result = sqlx::query("UPDATE exploratories SET scheduler_data = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(data.map(Json))
            .execute(&self.pool)
            .await?;

        affected(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::libraries::LibStatus;
    use crate::test_utils::{notebook_request, spark_request};

    #[sqlx::test]
    #[test_log::test]
    async fn test_insert_rejects_duplicate_name(pool: PgPool) {
        let dao = PgExploratories::new(pool);
        let nb = dao.insert(&notebook_request("alice", "ds", "nb")).await.unwrap();
        assert_eq!(nb.status, UserInstanceStatus::Creating);
        assert_eq!(nb.key(), ExploratoryKey::new("alice", "ds", "nb"));

        let err = dao.insert(&notebook_request("alice", "ds", "nb")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // Same name for another user or project is fine
        dao.insert(&notebook_request("bob", "ds", "nb")).await.unwrap();
        dao.insert(&notebook_request("alice", "ml", "nb")).await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_recreate_only_from_terminated_or_failed(pool: PgPool) {
        let dao = PgExploratories::new(pool);
        let nb = dao.insert(&notebook_request("alice", "ds", "nb")).await.unwrap();
        dao.update_status(nb.id, UserInstanceStatus::Running).await.unwrap();
        dao.update_fields(
            nb.id,
            &ExploratoryFieldsUpdate {
                instance_id: Some("i-123".to_string()),
                error_message: Some("boom".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let request = ExploratoryCreateDBRequest {
            shape: "m5.xlarge".to_string(),
            ..notebook_request("alice", "ds", "nb")
        };
        let err = dao.recreate(nb.id, &request).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));

        dao.update_status(nb.id, UserInstanceStatus::Terminated).await.unwrap();
        let recreated = dao.recreate(nb.id, &request).await.unwrap();
        assert_eq!(recreated.id, nb.id);
        assert_eq!(recreated.status, UserInstanceStatus::Creating);
        assert_eq!(recreated.shape, "m5.xlarge");
        assert_eq!(recreated.instance_id, None);
        assert_eq!(recreated.error_message, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_json_columns_round_trip(pool: PgPool) {
        let dao = PgExploratories::new(pool);
        let config = vec![ClusterConfig {
            classification: "spark-defaults".to_string(),
            properties: BTreeMap::from([("spark.executor.memory".to_string(), "4g".to_string())]),
            configurations: vec![],
        }];
        let request = ExploratoryCreateDBRequest {
            tags: BTreeMap::from([("team".to_string(), "research".to_string())]),
            cluster_config: config.clone(),
            ..notebook_request("alice", "ds", "nb")
        };
        let nb = dao.insert(&request).await.unwrap();

        let libs = vec![Library {
            group: "pip3".to_string(),
            name: "pandas".to_string(),
            version: Some("2.2.0".to_string()),
            status: LibStatus::Installed,
            error_message: None,
            add_deps: vec!["numpy".to_string()],
        }];
        let scheduler = SchedulerJobData {
            sync_start_required: true,
            ..Default::default()
        };
        let urls = vec![ResourceUrl {
            description: "Jupyter".to_string(),
            url: "http://10.0.0.5:8888".to_string(),
        }];
        dao.update_libs(nb.id, &libs).await.unwrap();
        dao.update_scheduler(nb.id, Some(&scheduler)).await.unwrap();
        dao.update_fields(
            nb.id,
            &ExploratoryFieldsUpdate {
                exploratory_url: Some(urls.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let stored = dao.find(&nb.key()).await.unwrap().unwrap();
        assert_eq!(stored.tags, request.tags);
        assert_eq!(stored.cluster_config, config);
        assert_eq!(stored.libs, libs);
        assert_eq!(stored.scheduler_data, Some(scheduler));
        assert_eq!(stored.exploratory_url, urls);

        dao.update_scheduler(nb.id, None).await.unwrap();
        assert_eq!(dao.find(&nb.key()).await.unwrap().unwrap().scheduler_data, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reads_attach_clusters_and_filter(pool: PgPool) {
        let dao = PgExploratories::new(pool.clone());
        let clusters = PgComputational::new(pool);
        let nb = dao.insert(&notebook_request("alice", "ds", "nb")).await.unwrap();
        let other = dao.insert(&notebook_request("bob", "ds", "other")).await.unwrap();
        clusters.insert(nb.id, &spark_request("spark")).await.unwrap();
        dao.update_status(other.id, UserInstanceStatus::Running).await.unwrap();
        dao.update_fields(
            other.id,
            &ExploratoryFieldsUpdate {
                instance_id: Some("i-other".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let found = dao.find(&nb.key()).await.unwrap().unwrap();
        assert_eq!(found.computational_resources.len(), 1);
        assert_eq!(found.computational_resources[0].computational_name, "spark");

        let by_instance = dao.find_by_instance_id("i-other").await.unwrap().unwrap();
        assert_eq!(by_instance.id, other.id);
        assert!(dao.find_by_instance_id("i-missing").await.unwrap().is_none());

        let running = dao
            .list(&ExploratoryFilter {
                statuses: vec![UserInstanceStatus::Running],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(running.iter().map(|e| e.id).collect::<Vec<_>>(), vec![other.id]);

        let alice = dao.list(&ExploratoryFilter::for_user("alice")).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert!(dao.list(&ExploratoryFilter { with_scheduler: true, ..Default::default() }).await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_unknown_id_is_not_found(pool: PgPool) {
        let dao = PgExploratories::new(pool);
        let err = dao.update_status(Uuid::new_v4(), UserInstanceStatus::Running).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}
