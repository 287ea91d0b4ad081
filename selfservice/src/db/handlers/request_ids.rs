//! Outstanding provisioning request ids.

use crate::db::errors::Result;
use crate::db::models::request_ids::RequestId;
use crate::types::{RequestUuid, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

#[async_trait::async_trait]
pub trait RequestIdDao: Send + Sync {
    async fn put(&self, request: &RequestId) -> Result<()>;

    /// Remove and return the request id if it is known and not expired.
    async fn take(&self, id: RequestUuid, now: DateTime<Utc>) -> Result<Option<RequestId>>;

    /// Drop ids that expired before `now`; returns how many were removed.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, FromRow)]
struct RequestIdRow {
    id: RequestUuid,
    user_name: String,
    request_time: DateTime<Utc>,
    expiration_time: DateTime<Utc>,
}

impl From<RequestIdRow> for RequestId {
    fn from(row: RequestIdRow) -> Self {
        Self {
            id: row.id,
            user: row.user_name,
            request_time: row.request_time,
            expiration_time: row.expiration_time,
        }
    }
}

pub struct PgRequestIds {
    pool: PgPool,
}

impl PgRequestIds {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RequestIdDao for PgRequestIds {
    #[instrument(skip(self, request), fields(request_id = %abbrev_uuid(&request.id), user = %request.user), err)]
    async fn put(&self, request: &RequestId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO request_ids (id, user_name, request_time, expiration_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET user_name = EXCLUDED.user_name, expiration_time = EXCLUDED.expiration_time
            "#,
        )
        .bind(request.id)
        .bind(&request.user)
        .bind(request.request_time)
        .bind(request.expiration_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(request_id = %abbrev_uuid(&id)), err)]
    async fn take(&self, id: RequestUuid, now: DateTime<Utc>) -> Result<Option<RequestId>> {
        let row = sqlx::query_as::<_, RequestIdRow>("DELETE FROM request_ids WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(RequestId::from).filter(|r| r.expiration_time >= now))
    }

    #[instrument(skip(self), err)]
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM request_ids WHERE expiration_time < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
