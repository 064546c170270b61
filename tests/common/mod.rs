#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use ledger_gateway::api::{create_router, AppState};
use ledger_gateway::config::IdempotencySettings;
use ledger_gateway::idempotency::{IdempotencyMediator, RecordStore, StoreConfig};
use ledger_gateway::models::{Account, LedgerReceipt, OperationType};
use ledger_gateway::services::{InMemoryLedger, Ledger, LedgerError};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

/// Ledger that delays every balance change and counts how often it is invoked.
pub struct SlowLedger {
    inner: InMemoryLedger,
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowLedger {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryLedger::new(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for SlowLedger {
    async fn open_account(&self, name: String, opening_balance: Decimal) -> Result<Account, LedgerError> {
        self.inner.open_account(name, opening_balance).await
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        self.inner.find_account(account_id).await
    }

    async fn execute(
        &self,
        account_id: Uuid,
        operation: OperationType,
        amount: Decimal,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.execute(account_id, operation, amount).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub ledger: Arc<SlowLedger>,
    pub store: Arc<RecordStore>,
}

pub struct TestAppBuilder {
    settings: IdempotencySettings,
    store_config: Option<StoreConfig>,
    delay: Duration,
}

impl TestAppBuilder {
    pub fn settings(mut self, f: impl FnOnce(&mut IdempotencySettings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = Some(config);
        self
    }

    pub fn ledger_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> TestApp {
        let store_config = self
            .store_config
            .unwrap_or_else(|| StoreConfig::from_settings(&self.settings));
        let store = Arc::new(RecordStore::new(store_config));
        let mediator = Arc::new(
            IdempotencyMediator::new(&self.settings, Arc::clone(&store))
                .expect("valid idempotency settings"),
        );
        let ledger = Arc::new(SlowLedger::new(self.delay));

        let state = AppState::new(ledger.clone(), mediator);
        TestApp {
            router: create_router(state),
            ledger,
            store,
        }
    }
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            settings: IdempotencySettings::default(),
            store_config: None,
            delay: Duration::ZERO,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        send(&self.router, request).await
    }

    /// Opens an account directly on the ledger and returns its id.
    pub async fn open_account(&self, balance: &str) -> Uuid {
        self.ledger
            .open_account("Test Account".to_string(), dec(balance))
            .await
            .expect("account opened")
            .id
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.ledger
            .find_account(account_id)
            .await
            .expect("account exists")
            .balance
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl TestResponse {
    /// `data.new_balance` of a deposit/withdraw response.
    pub fn new_balance(&self) -> Decimal {
        dec(self.body["data"]["new_balance"]
            .as_str()
            .expect("new_balance present"))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };

    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).expect("valid decimal")
}

pub fn operation_request(
    account_id: Uuid,
    operation: &str,
    key: Option<&str>,
    body: &str,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/accounts/{}/{}", account_id, operation))
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).expect("valid request")
}

pub fn withdraw(account_id: Uuid, key: &str, amount: &str) -> Request<Body> {
    operation_request(
        account_id,
        "withdraw",
        Some(key),
        &format!(r#"{{"amount":"{}"}}"#, amount),
    )
}

pub fn deposit(account_id: Uuid, key: &str, amount: &str) -> Request<Body> {
    operation_request(
        account_id,
        "deposit",
        Some(key),
        &format!(r#"{{"amount":"{}"}}"#, amount),
    )
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}
