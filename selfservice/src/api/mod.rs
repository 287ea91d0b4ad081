//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Everything is served under `/api`:
//!
//! - **Notebooks** (`/infrastructure_provision/exploratory_environment/*`): lifecycle, images, libraries, schedules
//! - **Clusters** (`/infrastructure_provision/computational_resources/*`)
//! - **Callbacks** (`/infrastructure_provision/callback/*`): provisioning service status reports
//! - **Projects** (`/project/*`) and **Endpoints** (`/endpoint/*`)
//! - **Billing** (`/billing/*`), **Environment** (`/infrastructure/*`, `/environment/*`), **Audit** (`/audit`)
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. Documentation is served at `/docs`.

pub mod handlers;
pub mod models;
