use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::idempotency::{idempotency_layer, IdempotencyMediator};
use crate::observability::{get_metrics, LatencyTimer};
use crate::services::Ledger;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub idempotency: Arc<IdempotencyMediator>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, idempotency: Arc<IdempotencyMediator>) -> Self {
        Self {
            ledger,
            idempotency,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main API router with all routes.
///
/// Deposit and withdraw sit behind the idempotency layer; the layer itself
/// decides which requests it mediates.
pub fn create_router(state: AppState) -> Router {
    let mediator = Arc::clone(&state.idempotency);

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/idempotency/stats", get(handlers::idempotency_stats))
        // Account endpoints
        .route("/accounts", post(handlers::open_account))
        .route("/accounts/:id", get(handlers::get_account))
        .route("/accounts/:id/deposit", post(handlers::deposit))
        .route("/accounts/:id/withdraw", post(handlers::withdraw))
        .layer(middleware::from_fn_with_state(mediator, idempotency_layer))
        .layer(middleware::from_fn(track_http_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}
