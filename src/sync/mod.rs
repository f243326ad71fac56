//! Realtime synchronization services.
//!
//! A [`SyncService`] keeps a local copy of one server-side entity current by
//! combining an initial fetch with a server-filtered change feed:
//!
//! - `start(key)` fetches, publishes the value, then opens the feed
//! - each notification is parsed and applied by the [`SyncModel`]
//! - channel failures mark the connection stale but keep the value
//! - `stop()` releases the feed and keeps the last known value
//!
//! # Example
//!
//! ```ignore
//! let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
//! let balances = BalanceService::new(backend, BalanceModel::default());
//!
//! balances.start(AccountKey::new("user-1", "acc-1"))?;
//! let sub = balances.subscribe_value();
//! while let Ok(balance) = sub.recv() {
//!     println!("balance: {:.2}", balance);
//! }
//! ```

mod connection;
mod manager;
mod model;
mod service;

pub use connection::{ConnectionState, Freshness};
pub use model::{SyncModel, Transition};
pub use service::{Lease, SyncService};
