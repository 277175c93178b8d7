//! API error type with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorBody;
use thiserror::Error;

use crate::store::AuditStoreError;

/// Audit-service error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    /// Client input violates a schema or invariant.
    #[error("{0}")]
    Validation(String),

    /// Row absent.
    #[error("{0}")]
    NotFound(String),

    /// Unique-constraint violation.
    #[error("{0}")]
    Conflict(String),

    /// Query failure not captured above.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Anything uncategorized.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code consumed by clients; never renamed.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody::new(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<AuditStoreError> for AppError {
    fn from(err: AuditStoreError) -> Self {
        match err {
            AuditStoreError::Duplicate { existing } => {
                AppError::Conflict(format!("audit row already exists: {existing}"))
            }
            AuditStoreError::Database(e) => AppError::Database(e),
            AuditStoreError::Decode(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AuditLogId;

    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn duplicate_maps_to_conflict() {
        let err: AppError = AuditStoreError::Duplicate {
            existing: AuditLogId::new(),
        }
        .into();
        assert_eq!(err.code(), "CONFLICT");
    }
}
