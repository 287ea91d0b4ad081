//! Billing lines collected from the billing source.

use crate::db::errors::{DbError, Result};
use crate::db::models::billing::{BillingFilter, BillingReportLine, BillingResourceType};
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

#[async_trait::async_trait]
pub trait BillingDao: Send + Sync {
    /// Replace all lines of `endpoint` with usage dates in `[from, to]` by `lines`.
    async fn replace_lines(&self, endpoint: &str, from: NaiveDate, to: NaiveDate, lines: &[BillingReportLine]) -> Result<()>;

    async fn lines(&self, filter: &BillingFilter) -> Result<Vec<BillingReportLine>>;

    /// Cost of a project, optionally counting only usage on or after `since`.
    async fn project_cost(&self, project: &str, since: Option<NaiveDate>) -> Result<f64>;

    /// Cost of the whole installation, optionally counting only usage on or after `since`.
    async fn total_cost(&self, since: Option<NaiveDate>) -> Result<f64>;
}

#[derive(Debug, FromRow)]
struct BillingRow {
    datalab_id: String,
    endpoint: Option<String>,
    user_name: Option<String>,
    project: Option<String>,
    exploratory_name: Option<String>,
    resource_name: Option<String>,
    resource_type: String,
    shape: Option<String>,
    product: String,
    usage_type: Option<String>,
    usage_date: NaiveDate,
    cost: f64,
    currency: String,
}

impl TryFrom<BillingRow> for BillingReportLine {
    type Error = DbError;

    fn try_from(row: BillingRow) -> Result<Self> {
        Ok(Self {
            resource_type: BillingResourceType::from_db_string(&row.resource_type)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown billing resource type '{}'", row.resource_type)))?,
            datalab_id: row.datalab_id,
            endpoint: row.endpoint,
            user: row.user_name,
            project: row.project,
            exploratory_name: row.exploratory_name,
            resource_name: row.resource_name,
            shape: row.shape,
            product: row.product,
            usage_type: row.usage_type,
            usage_date: row.usage_date,
            cost: row.cost,
            currency: row.currency,
        })
    }
}

pub struct PgBilling {
    pool: PgPool,
}

impl PgBilling {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BillingDao for PgBilling {
    #[instrument(skip(self, lines), fields(count = lines.len()), err)]
    async fn replace_lines(&self, endpoint: &str, from: NaiveDate, to: NaiveDate, lines: &[BillingReportLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM billing_lines WHERE endpoint = $1 AND usage_date BETWEEN $2 AND $3")
            .bind(endpoint)
            .bind(from)
            .bind(to)
            .execute(&mut *tx)
            .await?;

        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO billing_lines
                    (datalab_id, endpoint, user_name, project, exploratory_name, resource_name, resource_type, shape,
                     product, usage_type, usage_date, cost, currency)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(&line.datalab_id)
            .bind(endpoint)
            .bind(&line.user)
            .bind(&line.project)
            .bind(&line.exploratory_name)
            .bind(&line.resource_name)
            .bind(line.resource_type.as_str())
            .bind(&line.shape)
            .bind(&line.product)
            .bind(&line.usage_type)
            .bind(line.usage_date)
            .bind(line.cost)
            .bind(&line.currency)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn lines(&self, filter: &BillingFilter) -> Result<Vec<BillingReportLine>> {
        let resource_types: Vec<String> = filter.resource_types.iter().map(|t| t.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, BillingRow>(
            r#"
            SELECT datalab_id, endpoint, user_name, project, exploratory_name, resource_name, resource_type, shape,
                   product, usage_type, usage_date, cost, currency
            FROM billing_lines
            WHERE ($1::date IS NULL OR usage_date >= $1)
              AND ($2::date IS NULL OR usage_date <= $2)
              AND (cardinality($3::text[]) = 0 OR user_name = ANY($3))
              AND (cardinality($4::text[]) = 0 OR project = ANY($4))
              AND (cardinality($5::text[]) = 0 OR resource_type = ANY($5))
              AND (cardinality($6::text[]) = 0 OR datalab_id = ANY($6))
            ORDER BY usage_date, datalab_id
            "#,
        )
        .bind(filter.date_start)
        .bind(filter.date_end)
        .bind(&filter.users)
        .bind(&filter.projects)
        .bind(resource_types)
        .bind(&filter.datalab_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), err)]
    async fn project_cost(&self, project: &str, since: Option<NaiveDate>) -> Result<f64> {
        let cost: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(cost) FROM billing_lines WHERE project = $1 AND ($2::date IS NULL OR usage_date >= $2)",
        )
        .bind(project)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(cost.unwrap_or(0.0))
    }

    #[instrument(skip(self), err)]
    async fn total_cost(&self, since: Option<NaiveDate>) -> Result<f64> {
        let cost: Option<f64> = sqlx::query_scalar("SELECT SUM(cost) FROM billing_lines WHERE ($1::date IS NULL OR usage_date >= $1)")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok(cost.unwrap_or(0.0))
    }
}
