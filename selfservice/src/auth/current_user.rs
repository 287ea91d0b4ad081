use crate::{
    AppState,
    auth::token,
    config::Config,
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::collections::BTreeSet;
use tracing::{instrument, trace};

/// The authenticated caller.
///
/// The bearer token is kept so that provisioning calls made on the caller's behalf can forward it.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub name: String,
    pub groups: BTreeSet<String>,
    pub is_admin: bool,
    pub token: String,
}

impl CurrentUser {
    /// Identity used by background jobs acting on behalf of `user`.
    pub fn system(user: &str, token: &str) -> Self {
        Self {
            name: user.to_string(),
            groups: BTreeSet::new(),
            is_admin: true,
            token: token.to_string(),
        }
    }
}

/// Extract the bearer token from the Authorization header
fn bearer_token(parts: &Parts) -> Option<Result<&str>> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?;
    let value = match header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };
    Some(
        value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(Error::Unauthenticated {
                message: Some("Expected a bearer token".to_string()),
            }),
    )
}

fn authenticate(token: &str, config: &Config) -> Result<CurrentUser> {
    let claims = token::verify_token(token, config)?;
    Ok(CurrentUser {
        is_admin: claims.groups.contains(&config.auth.admin_group),
        name: claims.sub,
        groups: claims.groups,
        token: token.to_string(),
    })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(parts).ok_or(Error::Unauthenticated { message: None })??;
        let user = authenticate(token, &state.config)?;
        trace!(user = %user.name, admin = user.is_admin, "Authenticated request");
        Ok(user)
    }
}

/// An authenticated caller that belongs to the admin group.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(Error::InsufficientPermissions {
                action: "manage".to_string(),
                resource: "the environment".to_string(),
            });
        }
        Ok(RequireAdmin(user))
    }
}

/// A request from the provisioning service, authenticated with the shared callback token.
#[derive(Debug, Clone, Copy)]
pub struct CallbackAuth;

impl FromRequestParts<AppState> for CallbackAuth {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Without a configured token callbacks cannot be authenticated at all
        let Some(expected) = state.config.auth.callback_token.as_deref() else {
            return Err(Error::Unauthenticated {
                message: Some("Callbacks are not enabled".to_string()),
            });
        };
        let token = bearer_token(parts).ok_or(Error::Unauthenticated { message: None })??;
        if token != expected {
            return Err(Error::Unauthenticated {
                message: Some("Invalid callback token".to_string()),
            });
        }
        Ok(CallbackAuth)
    }
}
