pub mod account;

pub use account::{Account, LedgerReceipt, OperationType};
