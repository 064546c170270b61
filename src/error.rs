use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use thiserror::Error;

use crate::api::requests::validation_details;
use crate::api::responses::{ApiResponse, ErrorResponse, IdempotencyErrorBody};
use crate::idempotency::replay::{replay, StoredResponse};
use crate::services::LedgerError;

/// Seconds a client is told to back off before retrying a retryable rejection.
pub const RETRY_AFTER_SECONDS: u64 = 1;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Idempotency-Key header required")]
    MissingIdempotencyKey,

    #[error("Invalid Idempotency-Key: {0}")]
    InvalidIdempotencyKey(String),

    #[error("Idempotency-Key was already used for a request with a different payload")]
    FingerprintConflict,

    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("Timed out after {waited:?} waiting for the original request to finish")]
    CoordinationTimeout { waited: Duration },

    #[error("Upstream operation failed with status {}", .0.status)]
    UpstreamExecution(StoredResponse),

    #[error("Idempotency store is at capacity ({capacity} records)")]
    StoreCapacity { capacity: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request validation failed")]
    InvalidRequest(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingIdempotencyKey
            | AppError::InvalidIdempotencyKey(_)
            | AppError::Validation(_)
            | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::FingerprintConflict => StatusCode::CONFLICT,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::CoordinationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::UpstreamExecution(response) => response.status,
            AppError::StoreCapacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Ledger(err) => err.status_code(),
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingIdempotencyKey => "IDEMPOTENCY_KEY_REQUIRED",
            AppError::InvalidIdempotencyKey(_) => "INVALID_IDEMPOTENCY_KEY",
            AppError::FingerprintConflict => "IDEMPOTENCY_KEY_CONFLICT",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::CoordinationTimeout { .. } => "IDEMPOTENCY_WAIT_TIMEOUT",
            AppError::UpstreamExecution(_) => "UPSTREAM_EXECUTION_FAILED",
            AppError::StoreCapacity { .. } => "IDEMPOTENCY_STORE_FULL",
            AppError::Validation(_) | AppError::InvalidRequest(_) => "VALIDATION_ERROR",
            AppError::Ledger(err) => err.code(),
            AppError::Config(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::CoordinationTimeout { .. } | AppError::StoreCapacity { .. }
        )
    }

    fn is_idempotency_rejection(&self) -> bool {
        matches!(
            self,
            AppError::MissingIdempotencyKey
                | AppError::InvalidIdempotencyKey(_)
                | AppError::FingerprintConflict
                | AppError::PayloadTooLarge { .. }
                | AppError::CoordinationTimeout { .. }
                | AppError::StoreCapacity { .. }
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let AppError::UpstreamExecution(stored) = &self {
            return replay(stored);
        }

        if self.is_idempotency_rejection() {
            let body = IdempotencyErrorBody::new(self.to_string(), self.code());
            let mut response = (status, Json(body)).into_response();
            if self.is_retryable() {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECONDS));
            }
            return response;
        }

        if let AppError::InvalidRequest(errors) = &self {
            let error = ErrorResponse::new(self.code(), self.to_string())
                .with_details(validation_details(errors));
            return (status, Json(ApiResponse::<()>::error(error))).into_response();
        }

        let message = match &self {
            AppError::Config(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "Request failed with internal error");
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        (
            status,
            Json(ApiResponse::<()>::error(ErrorResponse::new(self.code(), message))),
        )
            .into_response()
    }
}
