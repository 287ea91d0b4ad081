//! Data access traits and their PostgreSQL implementations.
//!
//! Each submodule defines a `*Dao` trait for one table and a `Pg*` struct implementing it over a
//! [`sqlx::PgPool`]. [`crate::db::memory::InMemoryStore`] implements every trait without a database.
//!
//! # Available DAOs
//!
//! - [`ExploratoryDao`]: notebooks, with their clusters attached on read
//! - [`ComputationalDao`]: clusters and the parent-driven status cascade
//! - [`ProjectDao`]: projects, their endpoints and edge node state
//! - [`EndpointDao`]: registered provisioning endpoints
//! - [`BillingDao`]: collected billing lines and cost aggregation
//! - [`AuditDao`]: audit log
//! - [`RequestIdDao`]: outstanding provisioning request ids
//! - [`BackupDao`]: backup requests

pub mod audit;
pub mod backups;
pub mod billing;
pub mod computational;
pub mod endpoints;
pub mod exploratories;
pub mod projects;
pub mod request_ids;

pub use audit::{AuditDao, PgAudit};
pub use backups::{BackupDao, PgBackups};
pub use billing::{BillingDao, PgBilling};
pub use computational::{ComputationalDao, PgComputational};
pub use endpoints::{EndpointDao, PgEndpoints};
pub use exploratories::{ExploratoryDao, PgExploratories};
pub use projects::{PgProjects, ProjectDao};
pub use request_ids::{PgRequestIds, RequestIdDao};
