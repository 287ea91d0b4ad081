//! Persistence for notebooks, clusters, projects and everything around them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Services   │  (crate::services - lifecycle rules)
//! └──────┬──────┘
//!        │  Arc<dyn *Dao>
//!        ↓
//! ┌─────────────┐
//! │    DAOs     │  (db::handlers - PostgreSQL, db::memory - in process)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - stored records)
//! └─────────────┘
//! ```
//!
//! Services never see a pool; they receive a [`Store`] holding one handle per table. Which
//! backend sits behind it is decided once at startup from the `database` config section.
//!
//! # Migrations
//!
//! Schema migrations live in `migrations/` and are applied by [`crate::migrator`] before a
//! PostgreSQL store is built.

pub mod errors;
pub mod handlers;
pub mod memory;
pub mod models;

use handlers::{
    AuditDao, BackupDao, BillingDao, ComputationalDao, EndpointDao, ExploratoryDao, PgAudit, PgBackups, PgBilling, PgComputational,
    PgEndpoints, PgExploratories, PgProjects, PgRequestIds, ProjectDao, RequestIdDao,
};
use memory::InMemoryStore;
use sqlx::PgPool;
use std::sync::Arc;

/// One handle per table.
#[derive(Clone)]
pub struct Store {
    pub exploratories: Arc<dyn ExploratoryDao>,
    pub computational: Arc<dyn ComputationalDao>,
    pub projects: Arc<dyn ProjectDao>,
    pub endpoints: Arc<dyn EndpointDao>,
    pub billing: Arc<dyn BillingDao>,
    pub audit: Arc<dyn AuditDao>,
    pub request_ids: Arc<dyn RequestIdDao>,
    pub backups: Arc<dyn BackupDao>,
}

impl Store {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            exploratories: Arc::new(PgExploratories::new(pool.clone())),
            computational: Arc::new(PgComputational::new(pool.clone())),
            projects: Arc::new(PgProjects::new(pool.clone())),
            endpoints: Arc::new(PgEndpoints::new(pool.clone())),
            billing: Arc::new(PgBilling::new(pool.clone())),
            audit: Arc::new(PgAudit::new(pool.clone())),
            request_ids: Arc::new(PgRequestIds::new(pool.clone())),
            backups: Arc::new(PgBackups::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let store = InMemoryStore::new();
        Self {
            exploratories: Arc::new(store.clone()),
            computational: Arc::new(store.clone()),
            projects: Arc::new(store.clone()),
            endpoints: Arc::new(store.clone()),
            billing: Arc::new(store.clone()),
            audit: Arc::new(store.clone()),
            request_ids: Arc::new(store.clone()),
            backups: Arc::new(store),
        }
    }
}
