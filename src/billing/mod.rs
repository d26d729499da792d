pub mod api;
pub mod payments;

use axum::{response::IntoResponse, Json};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::core::rbac::PermissionDenied;

pub use api::configure_billing_routes;
pub use payments::{Payment, PaymentStatus};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::Forbidden(_) => "forbidden",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<DieselError> for BillingError {
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

impl From<diesel::r2d2::PoolError> for BillingError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for BillingError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<PermissionDenied> for BillingError {
    fn from(e: PermissionDenied) -> Self {
        Self::Forbidden(e.to_string())
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::InvalidState(msg) | Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::Database(msg) | Self::Internal(msg) => {
                log::error!("billing request failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": self.kind(), "message": message })),
        )
            .into_response()
    }
}
