//! Service façade handed to consumers.

use super::connection::{ConnectionState, Freshness};
use super::manager::SubscriptionManager;
use super::model::SyncModel;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::feed::Backend;
use crate::streams::Subscription;
use crate::types::Source;
use std::sync::{Arc, Weak};

/// A live, eventually-consistent local view of one server-side entity.
///
/// Construct one per process (or per session) and share it by cloning; all
/// clones drive the same feed. Streams are read-only from here: only the
/// internal subscription manager emits.
pub struct SyncService<M: SyncModel> {
    manager: Arc<SubscriptionManager<M>>,
}

impl<M: SyncModel> SyncService<M> {
    pub fn new(backend: Arc<dyn Backend>, model: M) -> Self {
        Self::with_config(backend, model, SyncConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, model: M, config: SyncConfig) -> Self {
        Self {
            manager: SubscriptionManager::new(backend, model, &config),
        }
    }

    // --- Lifecycle ---

    /// Fetch the initial value and open the change feed for `key`.
    ///
    /// No-op while a healthy feed is bound to the same entity. Bound to a
    /// different entity (or to a failed feed), the old feed is released
    /// first. Fetch and subscribe errors are returned and recorded in the
    /// connection state.
    pub fn start(&self, key: M::Key) -> Result<()> {
        self.manager.start(key)
    }

    /// Release the feed. The last known value stays readable.
    pub fn stop(&self) {
        self.manager.stop()
    }

    /// Re-fetch the value outside the feed. Ignored (with a warning) when
    /// `key` names an entity other than the bound one.
    pub fn refresh(&self, key: &M::Key) -> Result<()> {
        self.manager.refresh(key)
    }

    /// Start (or join) the feed for `key` and hold it until the returned
    /// lease is dropped. The feed stops when the last lease on the current
    /// binding goes away; `stop` still works regardless of leases.
    ///
    /// Leases survive a rebind to the same entity (after a channel failure).
    /// Binding another entity, or stopping, makes existing leases stale.
    pub fn acquire(&self, key: M::Key) -> Result<Lease<M>> {
        let epoch = self.manager.acquire(key)?;
        Ok(Lease {
            manager: Arc::downgrade(&self.manager),
            epoch,
        })
    }

    /// Stop the feed and complete all streams. Later `start` calls fail.
    pub fn shutdown(&self) {
        self.manager.shutdown()
    }

    // --- Streams ---

    pub fn subscribe_value(&self) -> Subscription<M::Value> {
        self.manager.value().subscribe()
    }

    pub fn subscribe_updates(&self) -> Subscription<M::Update> {
        self.manager.updates().subscribe()
    }

    /// Updates originating from `source` only.
    pub fn subscribe_updates_from(&self, source: Source) -> Subscription<M::Update> {
        self.manager
            .updates()
            .subscribe_filtered(move |update| M::source_of(update) == source)
    }

    pub fn subscribe_updates_where<F>(&self, filter: F) -> Subscription<M::Update>
    where
        F: Fn(&M::Update) -> bool + Send + Sync + 'static,
    {
        self.manager.updates().subscribe_filtered(filter)
    }

    pub fn subscribe_connection(&self) -> Subscription<ConnectionState> {
        self.manager.connection().subscribe()
    }

    // --- Snapshots ---

    pub fn current_value(&self) -> M::Value {
        self.manager.value().current()
    }

    pub fn current_connection_state(&self) -> ConnectionState {
        self.manager.connection().current()
    }

    pub fn last_update(&self) -> Option<M::Update> {
        self.manager.updates().latest()
    }

    /// True once a fetch has populated the value.
    pub fn has_loaded(&self) -> bool {
        self.manager.has_loaded()
    }

    pub fn freshness(&self) -> Freshness {
        Freshness::of(self.has_loaded(), &self.current_connection_state())
    }

    pub fn bound_key(&self) -> Option<M::Key> {
        self.manager.bound_key()
    }

    /// Leases held on the current binding.
    pub fn lease_count(&self) -> usize {
        self.manager.lease_count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.manager.is_shut_down()
    }

    /// Short service name used in logs.
    pub fn name(&self) -> &'static str {
        self.manager.name()
    }
}

impl<M: SyncModel> Clone for SyncService<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

/// Shared interest in a service's feed. Dropping it releases the interest.
#[must_use = "dropping a lease immediately releases it"]
pub struct Lease<M: SyncModel> {
    manager: Weak<SubscriptionManager<M>>,
    epoch: u64,
}

impl<M: SyncModel> Lease<M> {
    /// False once the service was stopped or rebound to another entity;
    /// a stale lease no longer keeps anything alive.
    pub fn is_current(&self) -> bool {
        self.manager
            .upgrade()
            .map_or(false, |manager| manager.holds_epoch(self.epoch))
    }
}

impl<M: SyncModel> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release(self.epoch);
        }
    }
}
