use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use crate::idempotency::coordinator::{IdempotencyCoordinator, IdempotencyMetrics};
use crate::idempotency::eligibility::{extract_key, EligibilityFilter};
use crate::idempotency::fingerprint::Fingerprint;
use crate::idempotency::replay::{replay, ResponseReplayer};
use crate::idempotency::storage::RecordStore;
use crate::observability::mask_sensitive;

/// The full mediation pipeline: eligibility, fingerprinting, coordination and replay.
pub struct IdempotencyMediator {
    filter: EligibilityFilter,
    coordinator: IdempotencyCoordinator,
    replayer: Arc<ResponseReplayer>,
    max_key_length: usize,
    max_body_bytes: usize,
}

impl IdempotencyMediator {
    pub fn new(settings: &IdempotencySettings, store: Arc<RecordStore>) -> Result<Self> {
        Ok(Self {
            filter: EligibilityFilter::from_settings(settings)?,
            coordinator: IdempotencyCoordinator::new(store, settings.wait_timeout()),
            replayer: Arc::new(ResponseReplayer::new(
                &settings.replay_headers,
                settings.max_response_bytes,
            )?),
            max_key_length: settings.max_key_length,
            max_body_bytes: settings.max_body_bytes,
        })
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        self.coordinator.store()
    }

    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        self.coordinator.metrics()
    }

    /// Runs `request` through the pipeline, forwarding it to `next` at most
    /// once per idempotency key.
    pub async fn mediate(&self, request: Request, next: Next) -> Result<Response> {
        if !self.filter.classify(request.method(), request.uri().path()) {
            return Ok(next.run(request).await);
        }

        let key = extract_key(request.headers(), self.max_key_length)?;

        let (parts, body) = request.into_parts();
        let body = to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| AppError::PayloadTooLarge {
                limit: self.max_body_bytes,
            })?;
        let fingerprint = Fingerprint::compute(&parts.method, parts.uri.path(), &body);
        let request = Request::from_parts(parts, Body::from(body));

        let replayer = Arc::clone(&self.replayer);
        let execution = self
            .coordinator
            .execute(&key, &fingerprint, move || async move {
                let response = next.run(request).await;
                replayer.capture_outcome(response).await
            })
            .await?;

        tracing::info!(
            key = %mask_sensitive(&key, 4),
            replayed = execution.was_replayed(),
            status = execution.response().status.as_u16(),
            "Idempotent request resolved"
        );

        Ok(replay(execution.response()))
    }
}

/// Axum middleware entry point for [`IdempotencyMediator`].
pub async fn idempotency_layer(
    State(mediator): State<Arc<IdempotencyMediator>>,
    request: Request,
    next: Next,
) -> Response {
    match mediator.mediate(request, next).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(error = %e, code = e.code(), "Idempotent request rejected");
            e.into_response()
        }
    }
}
