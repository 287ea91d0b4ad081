//! HTTP request handlers for all API endpoints.
//!
//! Handlers extract and validate the request, call into [`crate::services`] and map the result to
//! a response. Actions that go through the provisioning service answer `202 Accepted` with the
//! request id the outcome will be reported under.
//!
//! # Handler Modules
//!
//! - [`exploratories`]: notebook lifecycle and images
//! - [`computational`]: Spark and cloud-managed clusters
//! - [`libraries`]: library installs and listings
//! - [`scheduler`]: per-resource start/stop/terminate schedules
//! - [`projects`]: projects, budgets and per-endpoint edges
//! - [`endpoints`]: provisioning endpoint registry
//! - [`billing`]: cost reports and quota
//! - [`environment`]: resource overviews and bulk stop
//! - [`backups`]: self-service node backups
//! - [`audit`]: audit log
//! - [`callbacks`]: status reports from the provisioning service
//!
//! # Authentication
//!
//! User-facing handlers take a [`crate::auth::CurrentUser`] or [`crate::auth::RequireAdmin`]
//! extractor. Callbacks take [`crate::auth::CallbackAuth`].

pub mod audit;
pub mod backups;
pub mod billing;
pub mod callbacks;
pub mod computational;
pub mod endpoints;
pub mod environment;
pub mod exploratories;
pub mod libraries;
pub mod projects;
pub mod scheduler;
