//! Consumer-side adapter binding a view's lifetime to a sync service.
//!
//! A [`LiveView`] is what a screen holds while it is mounted. It starts the
//! service once its key is known, mirrors the three streams into a local
//! [`ViewState`] on [`LiveView::poll`], and on drop unsubscribes and gives up
//! its lease. It never calls `stop` itself; the feed closes when the last
//! lease on it is released or when the application stops the service.

use crate::error::{Result, SyncError};
use crate::models::{BalanceModel, Transaction, TransactionsModel};
use crate::streams::Subscription;
use crate::sync::{ConnectionState, Freshness, Lease, SyncModel, SyncService};
use crate::types::{ChangeKind, Source, Timestamp};
use tracing::{debug, warn};

/// Render state mirrored from a service.
#[derive(Clone, Debug)]
pub struct ViewState<V, U> {
    pub value: V,
    pub last_update: Option<U>,
    pub connection: ConnectionState,
    pub loaded: bool,
}

pub struct LiveView<M: SyncModel> {
    service: SyncService<M>,
    key: Option<M::Key>,
    lease: Option<Lease<M>>,
    values: Subscription<M::Value>,
    updates: Subscription<M::Update>,
    connection: Subscription<ConnectionState>,
    state: ViewState<M::Value, M::Update>,
}

impl<M: SyncModel> LiveView<M> {
    /// Subscribe to `service` and, if `key` is given, start it.
    ///
    /// A failed start is not returned here; it shows up in the connection
    /// state like any other failure.
    pub fn mount(service: &SyncService<M>, key: Option<M::Key>) -> Self {
        let mut view = Self {
            values: service.subscribe_value(),
            updates: service.subscribe_updates(),
            connection: service.subscribe_connection(),
            state: ViewState {
                value: service.current_value(),
                last_update: None,
                connection: service.current_connection_state(),
                loaded: service.has_loaded(),
            },
            service: service.clone(),
            key: None,
            lease: None,
        };
        // Replayed emissions describe the state we already copied.
        view.values.drain();
        view.updates.drain();
        view.connection.drain();

        if let Err(e) = view.set_key(key) {
            warn!(service = view.name(), error = %e, "live view could not start its service");
        }
        view.poll();
        view
    }

    /// React to the key changing. Starts the service when a key becomes
    /// available and rebinds it when the key changes; `None` releases this
    /// view's interest.
    ///
    /// Setting the same key again is a no-op while this view's lease is
    /// current; after a failed start, or after another holder rebound the
    /// service to a different entity, it binds again.
    pub fn set_key(&mut self, key: Option<M::Key>) -> Result<()> {
        if key == self.key && (key.is_none() || self.is_bound()) {
            return Ok(());
        }
        self.key = key.clone();
        self.bind(key)
    }

    /// Start the service again for the current key, replacing a feed that
    /// reported a channel failure.
    pub fn reconnect(&mut self) -> Result<()> {
        self.bind(self.key.clone())
    }

    fn bind(&mut self, key: Option<M::Key>) -> Result<()> {
        let previous = self.lease.take();
        let outcome = match key {
            Some(key) => {
                debug!(service = self.name(), ?key, "live view binding");
                self.service.acquire(key).map(|lease| {
                    self.lease = Some(lease);
                })
            }
            None => Ok(()),
        };
        drop(previous);
        outcome
    }

    /// Pull every pending emission into the local state. Returns true if
    /// anything changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;

        if let Some(value) = self.values.drain().pop() {
            if value != self.state.value {
                self.state.value = value;
                changed = true;
            }
        }
        if let Some(update) = self.updates.drain().pop() {
            self.state.last_update = Some(update);
            changed = true;
        }
        if let Some(connection) = self.connection.drain().pop() {
            if connection != self.state.connection {
                self.state.connection = connection;
                changed = true;
            }
        }

        let loaded = self.service.has_loaded();
        if loaded != self.state.loaded {
            self.state.loaded = loaded;
            changed = true;
        }
        changed
    }

    /// Re-fetch for the current key. Without a key this only warns.
    pub fn refresh(&self) -> Result<()> {
        match self.key.as_ref() {
            Some(key) => self.service.refresh(key),
            None => {
                warn!(service = self.name(), "refresh requested before a key is available");
                Ok(())
            }
        }
    }

    pub fn state(&self) -> &ViewState<M::Value, M::Update> {
        &self.state
    }

    pub fn value(&self) -> &M::Value {
        &self.state.value
    }

    pub fn is_connected(&self) -> bool {
        self.state.connection.is_connected
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.state.connection.error.as_ref()
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.state.connection.last_update
    }

    /// A view whose lease went stale is never `Live`, even if the service
    /// is connected for someone else's key.
    pub fn freshness(&self) -> Freshness {
        match Freshness::of(self.state.loaded, &self.state.connection) {
            Freshness::Live if self.key.is_some() && !self.is_bound() => Freshness::Stale,
            freshness => freshness,
        }
    }

    /// True while the service is bound for this view's key.
    pub fn is_bound(&self) -> bool {
        self.lease.as_ref().map_or(false, Lease::is_current)
    }

    pub fn key(&self) -> Option<&M::Key> {
        self.key.as_ref()
    }

    fn name(&self) -> &'static str {
        self.service.name()
    }
}

pub type LiveBalance = LiveView<BalanceModel>;

impl LiveView<BalanceModel> {
    /// Balance in reais as of the last poll.
    pub fn balance(&self) -> f64 {
        self.state.value
    }
}

pub type LiveTransactions = LiveView<TransactionsModel>;

impl LiveView<TransactionsModel> {
    pub fn transactions(&self) -> &[Transaction] {
        &self.state.value
    }

    /// The most recent transaction pushed by the feed, if the last update
    /// was a realtime insert.
    pub fn new_transaction(&self) -> Option<&Transaction> {
        self.state
            .last_update
            .as_ref()
            .filter(|u| u.kind == ChangeKind::Insert && u.source == Source::Realtime)
            .map(|u| &u.transaction)
    }
}
