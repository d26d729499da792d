//! Request identity handed over by the authentication layer.
//!
//! The auth/session service in front of this server resolves the caller and
//! forwards `x-user-id` and `x-user-role`. Nothing here verifies credentials.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};

use crate::core::rbac::Role;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Student a request acts on: staff may name anyone, students only themselves.
    pub fn acting_for(&self, requested: Option<i64>) -> Result<i64, String> {
        match requested {
            None => Ok(self.user_id),
            Some(id) if id == self.user_id => Ok(id),
            Some(id) if self.role.is_staff() => Ok(id),
            Some(id) => Err(format!(
                "user {} may not act on behalf of student {}",
                self.user_id, id
            )),
        }
    }

    fn from_headers(parts: &Parts) -> Result<Self, String> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| format!("missing {USER_ID_HEADER} header"))?
            .to_str()
            .map_err(|_| format!("{USER_ID_HEADER} is not valid text"))?
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{USER_ID_HEADER} is not an integer id"))?;
        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .ok_or_else(|| format!("missing {USER_ROLE_HEADER} header"))?
            .to_str()
            .map_err(|_| format!("{USER_ROLE_HEADER} is not valid text"))?
            .parse::<Role>()?;
        Ok(Self { user_id, role })
    }
}

/// Axum extractor for AuthenticatedUser
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(*user);
        }
        Self::from_headers(parts).map_err(|message| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "unauthorized",
                    "message": message
                })),
            )
        })
    }
}
