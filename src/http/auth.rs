use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ChatError;

/// Set by the upstream gateway once the caller's token has been verified.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ChatError::Unauthorized("Missing X-User-Id header".to_string()))?;

        let user_id = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ChatError::Unauthorized(format!("Invalid X-User-Id header: {}", raw)))?;

        Ok(AuthUser(user_id))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub i64);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;

        let is_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case(ADMIN_ROLE));
        if !is_admin {
            return Err(ChatError::Forbidden);
        }

        Ok(AdminUser(user_id))
    }
}
