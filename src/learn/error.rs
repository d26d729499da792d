use axum::{response::IntoResponse, Json};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::billing::BillingError;
use crate::core::rbac::PermissionDenied;

#[derive(Debug, thiserror::Error)]
pub enum LearnError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LearnError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<DieselError> for LearnError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => Self::NotFound("record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Conflict(info.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<PermissionDenied> for LearnError {
    fn from(e: PermissionDenied) -> Self {
        Self::Forbidden(e.to_string())
    }
}

impl From<BillingError> for LearnError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::NotFound(m) => Self::NotFound(m),
            BillingError::InvalidArgument(m) => Self::InvalidArgument(m),
            BillingError::InvalidState(m) => Self::InvalidState(m),
            BillingError::Conflict(m) => Self::Conflict(m),
            BillingError::Forbidden(m) => Self::Forbidden(m),
            BillingError::Database(m) => Self::Database(m),
            BillingError::Internal(m) => Self::Internal(m),
        }
    }
}

impl From<diesel::r2d2::PoolError> for LearnError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for LearnError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for LearnError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("learn request failed: {}", self);
        }
        let message = match &self {
            Self::NotFound(msg)
            | Self::InvalidArgument(msg)
            | Self::InvalidState(msg)
            | Self::PreconditionFailed(msg)
            | Self::Conflict(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::Database(msg)
            | Self::Internal(msg) => msg.clone(),
        };
        (
            status,
            Json(serde_json::json!({ "error": self.kind(), "message": message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LearnError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (LearnError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (LearnError::InvalidState("x".into()), StatusCode::CONFLICT),
            (
                LearnError::PreconditionFailed("x".into()),
                StatusCode::PRECONDITION_FAILED,
            ),
            (LearnError::Conflict("x".into()), StatusCode::CONFLICT),
            (LearnError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                LearnError::Database("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: LearnError = DieselError::NotFound.into();
        assert!(matches!(err, LearnError::NotFound(_)));
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let err: LearnError = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value".to_string()),
        )
        .into();
        assert!(matches!(err, LearnError::Conflict(ref m) if m == "duplicate key value"));
    }
}
