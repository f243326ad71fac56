//! Reactive containers shared by the sync services.
//!
//! - [`ValueStore`]: latest value with replay for late subscribers and
//!   optional distinct-until-changed emission
//! - [`EventStream`]: broadcast of discrete events, replaying only the last
//!
//! Subscribers read from bounded channels. A subscriber that falls
//! `buffer_size` emissions behind keeps its subscription but loses the
//! oldest pending emissions, so the newest value is always delivered;
//! [`Subscription::missed`] reports how many were evicted.
//!
//! # Example
//!
//! ```ignore
//! let balance = ValueStore::new("balance", 0.0);
//! let sub = balance.subscribe();
//!
//! balance.emit(12.5);
//! balance.emit(12.5); // suppressed
//!
//! assert_eq!(sub.drain(), vec![0.0, 12.5]);
//! ```

mod hub;
mod store;
mod types;

pub use store::{EventStream, ValueStore};
pub use types::{Subscription, SubscriptionId};
