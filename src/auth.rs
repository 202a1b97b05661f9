use std::env;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

use crate::error::StudioError;
use crate::handlers::AppState;

/// One authenticated caller with its capability flags. Stands in for the
/// host CMS's "current user / capabilities" collaborator.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiUser {
    pub id: i64,
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub can_edit_posts: bool,
    #[serde(default)]
    pub can_upload_files: bool,
}

#[derive(Clone, Debug)]
pub struct UserRegistry {
    users: Vec<ApiUser>,
}

impl UserRegistry {
    pub fn new(users: Vec<ApiUser>) -> Self {
        Self { users }
    }

    /// Reads the caller registry from `USERS` (a JSON array), falling back
    /// to a single all-capability admin keyed by `SECRET_KEY`.
    pub fn from_env() -> Result<Self> {
        if let Ok(raw) = env::var("USERS") {
            let users: Vec<ApiUser> =
                serde_json::from_str(&raw).context("USERS must be a JSON array of users")?;
            if users.is_empty() {
                bail!("USERS must contain at least one user");
            }
            return Ok(Self::new(users));
        }

        let secret = env::var("SECRET_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        match secret {
            Some(token) => Ok(Self::new(vec![ApiUser {
                id: 1,
                name: "admin".to_string(),
                token,
                can_edit_posts: true,
                can_upload_files: true,
            }])),
            None => bail!("set USERS (JSON array of users) or SECRET_KEY"),
        }
    }

    pub fn resolve(&self, token: &str) -> Option<&ApiUser> {
        self.users.iter().find(|user| user.token == token)
    }
}

/// Extracts the caller from `Authorization: Bearer <token>`.
pub struct CurrentUser(pub ApiUser);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = StudioError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty());

        token
            .and_then(|token| state.users.resolve(token))
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                StudioError::Permission(
                    "You do not have permission to use the content studio.".to_string(),
                )
            })
    }
}
