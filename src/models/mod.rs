//! Concrete sync models for the banking screens.

mod balance;
mod transactions;

pub use balance::{AccountKey, BalanceModel, BalanceService, BalanceUpdate, ACCOUNTS_TABLE};
pub use transactions::{
    apply_change, Transaction, TransactionStatus, TransactionType, TransactionUpdate,
    TransactionsModel, TransactionsService, TRANSACTIONS_TABLE,
};
