//! Stored records.
//!
//! Records are distinct from the API models in [`crate::api::models`]. Nested documents
//! (libraries, scheduler rules, Spark configuration, project endpoints) are plain serde types
//! stored as JSON and exposed through the API unchanged.

pub mod audit;
pub mod backups;
pub mod billing;
pub mod computational;
pub mod endpoints;
pub mod exploratories;
pub mod libraries;
pub mod projects;
pub mod request_ids;
pub mod scheduler;
