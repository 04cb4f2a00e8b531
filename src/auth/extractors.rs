use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{claims::Role, jwt::JwtKeys};
use crate::error::ApiError;

/// Identity of the caller, taken from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Same user or privileged role.
    pub fn may_access(&self, user_id: &str) -> bool {
        self.user_id == user_id || self.is_admin()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header"))?;

        let claims = keys.validate(token).map_err(|e| {
            warn!(reason = e.code(), "bearer token rejected");
            ApiError::from(e)
        })?;

        let Some(role) = claims.role else {
            warn!(user_id = %claims.user_id, "token without role claim");
            return Err(ApiError::unauthorized("Token carries no role"));
        };

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.username,
            role,
        })
    }
}
