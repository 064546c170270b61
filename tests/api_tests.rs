mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{dec, deposit, get, withdraw, TestApp};
use uuid::Uuid;

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let health = app.send(get("/health")).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["success"], true);
    assert_eq!(health.body["data"]["status"], "healthy");

    let live = app.send(get("/live")).await;
    assert_eq!(live.status, StatusCode::OK);
}

#[tokio::test]
async fn test_open_and_read_account() {
    let app = TestApp::new();

    let opened = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/accounts")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name":"Operating","opening_balance":"250.50"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(opened.status, StatusCode::CREATED);

    let id = opened.body["data"]["id"].as_str().unwrap().to_string();
    let read = app.send(get(&format!("/accounts/{}", id))).await;

    assert_eq!(read.status, StatusCode::OK);
    assert_eq!(read.body["data"]["name"], "Operating");
    assert_eq!(dec(read.body["data"]["balance"].as_str().unwrap()), dec("250.50"));
}

#[tokio::test]
async fn test_unknown_account_returns_not_found() {
    let app = TestApp::new();

    let read = app.send(get(&format!("/accounts/{}", Uuid::new_v4()))).await;
    assert_eq!(read.status, StatusCode::NOT_FOUND);
    assert_eq!(read.body["error"]["code"], "ACCOUNT_NOT_FOUND");

    // A failed operation on an unknown account is reported, not cached.
    let missing = Uuid::new_v4();
    let response = app.send(deposit(missing, "D1", "10")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_deposit_and_withdraw_envelope() {
    let app = TestApp::new();
    let account = app.open_account("100").await;

    let credited = app.send(deposit(account, "D2", "25.75")).await;
    assert_eq!(credited.status, StatusCode::OK);
    assert_eq!(credited.body["success"], true);
    assert_eq!(credited.body["data"]["operation"], "deposit");
    assert_eq!(credited.new_balance(), dec("125.75"));

    let debited = app.send(withdraw(account, "W2", "0.75")).await;
    assert_eq!(debited.body["data"]["operation"], "withdraw");
    assert_eq!(debited.new_balance(), dec("125.00"));
}

#[tokio::test]
async fn test_invalid_amount_is_a_validation_error() {
    let app = TestApp::new();
    let account = app.open_account("100").await;

    let response = app.send(withdraw(account, "W3", "-5")).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(response.body["error"]["details"][0]["field"], "amount");
    assert_eq!(app.ledger.calls(), 0);
}

#[tokio::test]
async fn test_deposit_overflowing_balance_is_rejected() {
    let app = TestApp::new();
    let account = app.open_account("1000").await;

    let response = app
        .send(deposit(account, "OVF", "79228162514264337593543950335"))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"]["code"], "INVALID_AMOUNT");
    assert_eq!(app.balance(account).await, dec("1000"));
    assert!(app.store.get("OVF").is_none());
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let app = TestApp::new();
    let account = app.open_account("100").await;

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri(format!("/accounts/{}/deposit", account))
                .header("content-type", "application/json")
                .header("Idempotency-Key", "R1")
                .header("x-request-id", "req-123")
                .body(Body::from(r#"{"amount":"1"}"#))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-request-id"), Some("req-123"));

    let generated = app.send(get("/live")).await;
    assert!(generated.header("x-request-id").is_some());
}
