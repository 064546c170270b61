use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::api::requests::{AmountRequest, OpenAccountRequest};
use crate::api::responses::{
    AccountResponse, ApiResponse, HealthResponse, IdempotencyStatsResponse, OperationResponse,
};
use crate::error::{AppError, Result};
use crate::models::OperationType;
use crate::observability::get_metrics;

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        idempotency_records: state.idempotency.store().len(),
    };

    Json(ApiResponse::success(response))
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus exposition endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Counters and occupancy of the idempotency store.
pub async fn idempotency_stats(
    State(state): State<AppState>,
) -> Json<ApiResponse<IdempotencyStatsResponse>> {
    let counters = state.idempotency.metrics().snapshot();
    let store = state.idempotency.store();

    Json(ApiResponse::success(IdempotencyStatsResponse {
        live_records: store.len(),
        max_records: store.config().max_records,
        duplicate_rate: counters.duplicate_rate(),
        counters,
    }))
}

// ============================================================================
// Account Handlers
// ============================================================================

/// Open a new account.
pub async fn open_account(
    State(state): State<AppState>,
    payload: std::result::Result<Json<OpenAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<AccountResponse>>)> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    request.validate()?;

    let account = state
        .ledger
        .open_account(request.name, request.opening_balance.unwrap_or(Decimal::ZERO))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AccountResponse::from(account))),
    ))
}

/// Get account by ID.
pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AccountResponse>>> {
    let account = state.ledger.find_account(id).await?;
    Ok(Json(ApiResponse::success(AccountResponse::from(account))))
}

/// Credit an account.
pub async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: std::result::Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<OperationResponse>>> {
    apply_operation(&state, id, OperationType::Deposit, payload).await
}

/// Debit an account.
pub async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: std::result::Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<OperationResponse>>> {
    apply_operation(&state, id, OperationType::Withdraw, payload).await
}

async fn apply_operation(
    state: &AppState,
    account_id: Uuid,
    operation: OperationType,
    payload: std::result::Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<OperationResponse>>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    request.validate()?;

    let result = state.ledger.execute(account_id, operation, request.amount).await;
    get_metrics().record_ledger_operation(operation.as_str(), result.is_ok());

    let receipt = result?;
    Ok(Json(ApiResponse::success(OperationResponse::from(receipt))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_router;
    use crate::config::IdempotencySettings;
    use crate::idempotency::{IdempotencyMediator, RecordStore, StoreConfig};
    use crate::models::LedgerReceipt;
    use crate::services::{LedgerError, MockLedger};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state_with(ledger: MockLedger) -> AppState {
        let settings = IdempotencySettings::default();
        let store = Arc::new(RecordStore::new(StoreConfig::from_settings(&settings)));
        let mediator = Arc::new(IdempotencyMediator::new(&settings, store).unwrap());
        AppState::new(Arc::new(ledger), mediator)
    }

    fn withdraw_request(account_id: Uuid, key: Option<&str>, amount: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/accounts/{}/withdraw", account_id))
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("Idempotency-Key", key);
        }
        builder
            .body(Body::from(format!(r#"{{"amount":"{}"}}"#, amount)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_never_reaches_ledger() {
        let mut ledger = MockLedger::new();
        ledger.expect_execute().never();

        let app = create_router(state_with(ledger));
        let response = app
            .oneshot(withdraw_request(Uuid::new_v4(), None, "100"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Idempotency-Key header required");
    }

    #[tokio::test]
    async fn test_failed_operation_is_not_cached() {
        let account_id = Uuid::new_v4();
        let mut ledger = MockLedger::new();
        let mut seq = mockall::Sequence::new();
        ledger
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, amount| {
                Err(LedgerError::InsufficientFunds {
                    available: dec!(50),
                    requested: amount,
                })
            });
        ledger
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |id, operation, amount| {
                Ok(LedgerReceipt {
                    transaction_id: Uuid::new_v4(),
                    account_id: id,
                    operation,
                    amount,
                    new_balance: dec!(0),
                    processed_at: chrono::Utc::now(),
                })
            });

        let app = create_router(state_with(ledger));

        let first = app
            .clone()
            .oneshot(withdraw_request(account_id, Some("retry-me"), "100"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let second = app
            .oneshot(withdraw_request(account_id, Some("retry-me"), "100"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_account_is_not_protected() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_find_account()
            .returning(|id| Err(LedgerError::AccountNotFound(id)));

        let app = create_router(state_with(ledger));
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/accounts/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ApiResponse<()> = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error.unwrap().code, "ACCOUNT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_open_account_validation_error() {
        let mut ledger = MockLedger::new();
        ledger.expect_open_account().never();

        let app = create_router(state_with(ledger));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/accounts")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"","opening_balance":"-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_without_recorder() {
        let app = create_router(state_with(MockLedger::new()));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
