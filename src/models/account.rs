use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::LedgerError;

/// Balance-changing operations exposed through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Credits the account.
    Deposit,
    /// Debits the account. Rejected when funds are insufficient.
    Withdraw,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Deposit => "deposit",
            OperationType::Withdraw => "withdraw",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-currency account held by the in-memory ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Creates a new Account with the given opening balance.
    pub fn new(name: String, opening_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            balance: opening_balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the account can cover a debit of `amount`.
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Applies `operation` to the balance and returns the new balance.
    ///
    /// Callers are responsible for checking funds before a withdrawal. The
    /// balance is left untouched when the result would not fit in a `Decimal`.
    pub fn apply(&mut self, operation: OperationType, amount: Decimal) -> Result<Decimal, LedgerError> {
        let balance = match operation {
            OperationType::Deposit => self.balance.checked_add(amount),
            OperationType::Withdraw => self.balance.checked_sub(amount),
        }
        .ok_or_else(|| {
            LedgerError::InvalidAmount(format!("{} of {} overflows the balance", operation, amount))
        })?;

        self.balance = balance;
        self.updated_at = Utc::now();
        Ok(balance)
    }
}

/// Result of a ledger operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub operation: OperationType,
    pub amount: Decimal,
    pub new_balance: Decimal,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_creation() {
        let account = Account::new("Main".to_string(), dec!(1000));

        assert_eq!(account.name, "Main");
        assert_eq!(account.balance, dec!(1000));
        assert_eq!(account.created_at, account.updated_at);
    }

    #[test]
    fn test_apply_deposit_and_withdraw() {
        let mut account = Account::new("Main".to_string(), dec!(1000));

        assert_eq!(account.apply(OperationType::Withdraw, dec!(100)), Ok(dec!(900)));
        assert_eq!(account.apply(OperationType::Deposit, dec!(50.25)), Ok(dec!(950.25)));
        assert_eq!(account.balance, dec!(950.25));
    }

    #[test]
    fn test_apply_overflow_leaves_balance_untouched() {
        let mut account = Account::new("Main".to_string(), dec!(1));

        let result = account.apply(OperationType::Deposit, Decimal::MAX);

        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
        assert_eq!(account.balance, dec!(1));
    }

    #[test]
    fn test_can_cover() {
        let account = Account::new("Main".to_string(), dec!(100));

        assert!(account.can_cover(dec!(100)));
        assert!(!account.can_cover(dec!(100.01)));
    }

    #[test]
    fn test_operation_type_serialization() {
        assert_eq!(
            serde_json::to_string(&OperationType::Withdraw).unwrap(),
            "\"withdraw\""
        );
        let parsed: OperationType = serde_json::from_str("\"deposit\"").unwrap();
        assert_eq!(parsed, OperationType::Deposit);
    }
}
