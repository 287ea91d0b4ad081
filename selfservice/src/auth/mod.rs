//! Authentication and authorization.
//!
//! Every API request carries an `Authorization: Bearer <jwt>` header. The token is signed with
//! the configured `secret_key` (HS256) and names the user and the groups they belong to.
//!
//! # Authorization
//!
//! - **Ownership**: notebooks and clusters are addressed under the caller's own name, so a user
//!   can only act on their own resources
//! - **Projects**: creating resources in a project requires sharing a group with it
//! - **Admins**: members of `auth.admin_group` manage projects and endpoints and see the whole
//!   environment
//!
//! Callbacks from the provisioning service do not use JWTs; they present the shared
//! `auth.callback_token` instead (see [`current_user::CallbackAuth`]).
//!
//! # Modules
//!
//! - [`token`]: JWT issuing and verification
//! - [`current_user`]: request extractors

pub mod current_user;
pub mod token;

pub use current_user::{CallbackAuth, CurrentUser, RequireAdmin};
