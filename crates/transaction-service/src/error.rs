//! API error type with HTTP response mapping.
//!
//! Every failure leaving a handler is one of these variants; the response
//! body carries a stable machine-readable code next to the message. Stack
//! traces are never serialized.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorBody;
use thiserror::Error;

use crate::saga::SagaError;
use crate::store::StoreError;

/// Transaction-service error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    /// Client input violates a schema or invariant.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer token.
    #[error("{0}")]
    Unauthorized(String),

    /// Row absent, or present but owned by a different principal; the two
    /// collapse for information hiding.
    #[error("{0}")]
    NotFound(String),

    /// Unique-constraint violation.
    #[error("{0}")]
    Conflict(String),

    /// The saga aborted; the sole externalization of consistency failure.
    #[error("Audit log creation failed or timed out: {0}")]
    DistributedTransaction(String),

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
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::DistributedTransaction(_)
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code consumed by clients; never renamed.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::DistributedTransaction(_) => "DISTRIBUTED_TRANSACTION_ERROR",
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

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Decode(msg) => AppError::Internal(msg),
        }
    }
}

impl From<SagaError> for AppError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Validation(msg) => AppError::Validation(msg),
            SagaError::NotFound => AppError::NotFound("Transaction not found".to_string()),
            SagaError::DistributedTransaction(reason) => AppError::DistributedTransaction(reason),
            SagaError::Store(e) => e.into(),
        }
    }
}
