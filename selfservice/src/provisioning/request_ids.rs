//! Registry of outstanding provisioning requests.

use crate::db::handlers::RequestIdDao;
use crate::db::models::request_ids::RequestId;
use crate::errors::{Error, Result};
use crate::types::{RequestUuid, abbrev_uuid};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Maps request UUIDs handed out by the provisioning service to the user who triggered them.
///
/// A UUID is consumed by the first callback that presents it; ids nobody answered expire after
/// the configured TTL.
#[derive(Clone)]
pub struct RequestIdRegistry {
    dao: Arc<dyn RequestIdDao>,
    ttl: Duration,
}

impl RequestIdRegistry {
    pub fn new(dao: Arc<dyn RequestIdDao>, ttl: Duration) -> Self {
        Self { dao, ttl }
    }

    #[instrument(skip(self), fields(request_id = %abbrev_uuid(&id)), err)]
    pub async fn put(&self, user: &str, id: RequestUuid) -> Result<()> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| Error::Other(e.into()))?;
        self.dao
            .put(&RequestId {
                id,
                user: user.to_string(),
                request_time: now,
                expiration_time: now + ttl,
            })
            .await?;
        Ok(())
    }

    /// Consume a request id, returning the user it belongs to.
    #[instrument(skip(self), fields(request_id = %abbrev_uuid(&id)), err)]
    pub async fn check_and_remove(&self, id: RequestUuid) -> Result<String> {
        match self.dao.take(id, Utc::now()).await? {
            Some(request) => Ok(request.user),
            None => Err(Error::not_found("Request", id)),
        }
    }

    pub async fn remove_expired(&self) -> Result<u64> {
        let removed = self.dao.remove_expired(Utc::now()).await?;
        if removed > 0 {
            debug!(removed, "Dropped expired request ids");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_request_id_consumed_once() {
        let registry = RequestIdRegistry::new(Arc::new(InMemoryStore::new()), Duration::from_secs(60));
        let id = Uuid::new_v4();
        registry.put("alice", id).await.unwrap();

        assert_eq!(registry.check_and_remove(id).await.unwrap(), "alice");
        assert!(matches!(registry.check_and_remove(id).await, Err(Error::ResourceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let registry = RequestIdRegistry::new(Arc::new(InMemoryStore::new()), Duration::ZERO);
        registry.put("alice", Uuid::new_v4()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(registry.remove_expired().await.unwrap(), 1);
    }
}
