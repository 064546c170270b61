use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use http::StatusCode;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, LedgerReceipt, OperationType};
use crate::observability::mask_amount;

/// Errors raised by ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

impl LedgerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
        }
    }
}

/// The account ledger consumed by the HTTP handlers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Opens a new account with an opening balance.
    async fn open_account(&self, name: String, opening_balance: Decimal) -> Result<Account, LedgerError>;

    async fn find_account(&self, account_id: Uuid) -> Result<Account, LedgerError>;

    /// Applies a deposit or withdrawal and returns the resulting balance.
    async fn execute(
        &self,
        account_id: Uuid,
        operation: OperationType,
        amount: Decimal,
    ) -> Result<LedgerReceipt, LedgerError>;
}

/// Volatile ledger backed by a concurrent map. Balances live for the process lifetime.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: DashMap<Uuid, Account>,
    executions: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of balance-changing operations applied so far.
    pub fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn open_account(&self, name: String, opening_balance: Decimal) -> Result<Account, LedgerError> {
        if opening_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(
                "opening balance cannot be negative".to_string(),
            ));
        }

        let account = Account::new(name, opening_balance);
        self.accounts.insert(account.id, account.clone());

        tracing::info!(account_id = %account.id, "Account opened");
        Ok(account)
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        self.accounts
            .get(&account_id)
            .map(|account| account.clone())
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    async fn execute(
        &self,
        account_id: Uuid,
        operation: OperationType,
        amount: Decimal,
    ) -> Result<LedgerReceipt, LedgerError> {
        Self::validate_amount(amount)?;

        // The shard lock is held for the check and the update.
        let mut account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        if operation == OperationType::Withdraw && !account.can_cover(amount) {
            tracing::info!(
                account_id = %account_id,
                requested = %mask_amount(&amount),
                "Withdrawal rejected: insufficient funds"
            );
            return Err(LedgerError::InsufficientFunds {
                available: account.balance,
                requested: amount,
            });
        }

        let new_balance = account.apply(operation, amount)?;
        drop(account);
        self.executions.fetch_add(1, Ordering::SeqCst);

        let receipt = LedgerReceipt {
            transaction_id: Uuid::new_v4(),
            account_id,
            operation,
            amount,
            new_balance,
            processed_at: Utc::now(),
        };

        tracing::info!(
            transaction_id = %receipt.transaction_id,
            account_id = %account_id,
            operation = %operation,
            amount = %mask_amount(&amount),
            "Ledger operation applied"
        );

        Ok(receipt)
    }
}
