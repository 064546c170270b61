use axum::body::{to_bytes, Body, Bytes};
use axum::response::{IntoResponse, Response};
use http::{header, HeaderName, HeaderValue, StatusCode};

use crate::api::responses::IdempotencyErrorBody;
use crate::error::{AppError, Result};

/// An HTTP outcome captured verbatim for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
}

impl StoredResponse {
    /// Builds a JSON response with an `application/json` content type.
    pub fn json(status: StatusCode, body: &impl serde::Serialize) -> Self {
        let body = serde_json::to_vec(body).unwrap_or_default();
        Self {
            status,
            headers: vec![(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            body: Bytes::from(body),
        }
    }

    /// Outcome published when the operation itself could not produce a response.
    pub fn internal_error() -> Self {
        Self::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            &IdempotencyErrorBody::new("An internal error occurred", "INTERNAL_ERROR"),
        )
    }
}

impl IntoResponse for StoredResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }
        response
    }
}

/// Reproduces a stored outcome. Invokes nothing and touches no state.
pub fn replay(stored: &StoredResponse) -> Response {
    stored.clone().into_response()
}

/// Captures handler responses into [`StoredResponse`]s.
#[derive(Debug, Clone)]
pub struct ResponseReplayer {
    replay_headers: Vec<HeaderName>,
    max_body_bytes: usize,
}

impl ResponseReplayer {
    pub fn new(replay_headers: &[String], max_body_bytes: usize) -> Result<Self> {
        let replay_headers = replay_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes()).map_err(|_| {
                    AppError::Validation(format!("invalid replay header name '{}'", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            replay_headers,
            max_body_bytes,
        })
    }

    /// Buffers the response body and keeps only the headers marked for replay.
    pub async fn capture(&self, response: Response) -> Result<StoredResponse> {
        let (parts, body) = response.into_parts();
        let body = to_bytes(body, self.max_body_bytes).await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to buffer response body: {}", e))
        })?;

        let headers = self
            .replay_headers
            .iter()
            .flat_map(|name| {
                parts
                    .headers
                    .get_all(name)
                    .iter()
                    .map(move |value| (name.clone(), value.clone()))
            })
            .collect();

        Ok(StoredResponse {
            status: parts.status,
            headers,
            body,
        })
    }

    /// Captures a handler response and classifies it: 2xx is a completed
    /// outcome, anything else is an execution failure.
    ///
    /// A successful response that cannot be buffered still counts as completed,
    /// since the operation already ran; its stored body becomes an internal error.
    pub async fn capture_outcome(
        &self,
        response: Response,
    ) -> std::result::Result<StoredResponse, StoredResponse> {
        let succeeded = response.status().is_success();

        let stored = match self.capture(response).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, succeeded, "Could not capture response for replay");
                StoredResponse::internal_error()
            }
        };

        if succeeded {
            Ok(stored)
        } else {
            Err(stored)
        }
    }
}
