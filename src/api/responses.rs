use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::idempotency::MetricsSnapshot;
use crate::models::{Account, LedgerReceipt, OperationType};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ValidationErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Validation error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

/// Flat body returned when the idempotency layer rejects a request before it
/// reaches a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyErrorBody {
    pub error: String,
    pub code: String,
}

impl IdempotencyErrorBody {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub idempotency_records: usize,
}

/// Account response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            balance: account.balance,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Deposit/withdraw response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub operation: OperationType,
    pub amount: Decimal,
    pub new_balance: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<LedgerReceipt> for OperationResponse {
    fn from(receipt: LedgerReceipt) -> Self {
        Self {
            transaction_id: receipt.transaction_id,
            account_id: receipt.account_id,
            operation: receipt.operation,
            amount: receipt.amount,
            new_balance: receipt.new_balance,
            processed_at: receipt.processed_at,
        }
    }
}

/// Snapshot of the idempotency layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyStatsResponse {
    pub live_records: usize,
    pub max_records: usize,
    pub duplicate_rate: f64,
    pub counters: MetricsSnapshot,
}
