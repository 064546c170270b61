pub mod ledger_service;

pub use ledger_service::{InMemoryLedger, Ledger, LedgerError};

#[cfg(test)]
pub use ledger_service::MockLedger;
