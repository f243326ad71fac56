//! # Ledger Sync
//!
//! Live, eventually-consistent local views of server-side banking state.
//!
//! ## Core Concepts
//!
//! - **Streams**: replaying value stores and event streams with RAII subscriptions
//! - **Feeds**: a backend contract for fetching rows and watching row changes
//! - **Services**: one subscription manager per entity kind, owning a single feed
//! - **Models**: the balance and transaction ledger translations
//! - **Live views**: consumer adapters tying a screen's lifetime to a service
//!
//! ## Example
//!
//! ```ignore
//! use ledger_sync::{AccountKey, BalanceModel, BalanceService, LiveBalance, MemoryBackend};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let balances = BalanceService::new(backend, BalanceModel::default());
//!
//! let mut view = LiveBalance::mount(&balances, Some(AccountKey::new("user-1", "acc-1")));
//! if view.poll() {
//!     println!("R$ {:.2}", view.balance());
//! }
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod live;
pub mod models;
pub mod streams;
pub mod sync;
pub mod types;

// Re-exports
pub use config::{SyncConfig, DEFAULT_BUFFER_SIZE};
pub use error::{Result, SyncError};
pub use feed::{
    Backend, ChangePayload, ChannelStatus, FeedHandle, FeedId, FeedOp, Filter, MemoryBackend,
    OrderBy,
};
pub use live::{LiveBalance, LiveTransactions, LiveView, ViewState};
pub use models::{
    AccountKey, BalanceModel, BalanceService, BalanceUpdate, Transaction, TransactionStatus,
    TransactionType, TransactionUpdate, TransactionsModel, TransactionsService,
};
pub use streams::{EventStream, Subscription, SubscriptionId, ValueStore};
pub use sync::{ConnectionState, Freshness, Lease, SyncModel, SyncService, Transition};
pub use types::*;
