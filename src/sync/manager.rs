//! Subscription manager owning the single live feed of a service.

use super::connection::ConnectionState;
use super::model::{SyncModel, Transition};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::feed::{Backend, ChangePayload, ChannelStatus, EventCallback, FeedHandle, StatusCallback};
use crate::streams::{EventStream, ValueStore};
use crate::types::Source;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A bound feed. At most one exists per manager.
struct Binding<K> {
    key: K,
    entity: String,
    /// None while the feed is being opened.
    handle: Option<FeedHandle>,
    /// Callbacks opened for another generation are ignored.
    generation: u64,
    /// False once the channel reported a health failure.
    healthy: bool,
    /// Leases are counted per epoch. Rebinding the same entity keeps the
    /// epoch and its count; any other new binding starts a fresh epoch.
    epoch: u64,
    leases: usize,
}

struct ManagerState<K> {
    binding: Option<Binding<K>>,
    generation: u64,
    epochs: u64,
    shut_down: bool,
}

/// Owns one backend feed and is the only writer of the three streams.
///
/// Lock order: `lifecycle` before `state`. Feed callbacks only take `state`,
/// and the backend is never called while `state` is held.
pub(crate) struct SubscriptionManager<M: SyncModel> {
    model: M,
    backend: Arc<dyn Backend>,

    value: ValueStore<M::Value>,
    updates: EventStream<M::Update>,
    connection: ValueStore<ConnectionState>,

    state: Mutex<ManagerState<M::Key>>,
    /// Serializes start, stop, refresh, release and shutdown.
    lifecycle: Mutex<()>,
    loaded: AtomicBool,
}

impl<M: SyncModel> SubscriptionManager<M> {
    pub(crate) fn new(backend: Arc<dyn Backend>, model: M, config: &SyncConfig) -> Arc<Self> {
        let name = model.name();
        Arc::new(Self {
            value: ValueStore::from_config(name, M::Value::default(), config),
            updates: EventStream::with_buffer(name, config.buffer_size),
            connection: ValueStore::with_options(name, ConnectionState::default(), config.buffer_size, true),
            model,
            backend,
            state: Mutex::new(ManagerState {
                binding: None,
                generation: 0,
                epochs: 0,
                shut_down: false,
            }),
            lifecycle: Mutex::new(()),
            loaded: AtomicBool::new(false),
        })
    }

    // --- Lifecycle ---

    pub(crate) fn start(self: &Arc<Self>, key: M::Key) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.start_locked(key).map(|_| ())
    }

    /// Start (or join) the binding for `key` and count one lease on it.
    /// Returns the lease epoch.
    pub(crate) fn acquire(self: &Arc<Self>, key: M::Key) -> Result<u64> {
        let _lifecycle = self.lifecycle.lock();
        let epoch = self.start_locked(key)?;

        let mut state = self.state.lock();
        if let Some(binding) = state.binding.as_mut() {
            if binding.epoch == epoch {
                binding.leases += 1;
            }
        }
        Ok(epoch)
    }

    /// Drop one lease; the last lease of the current epoch stops the feed.
    pub(crate) fn release(&self, epoch: u64) {
        let _lifecycle = self.lifecycle.lock();
        let last = {
            let mut state = self.state.lock();
            match state.binding.as_mut() {
                Some(binding) if binding.epoch == epoch => {
                    binding.leases = binding.leases.saturating_sub(1);
                    binding.leases == 0
                }
                _ => false,
            }
        };

        if last {
            debug!(service = self.model.name(), "last lease released");
            self.teardown_locked();
        }
    }

    pub(crate) fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.teardown_locked();
    }

    pub(crate) fn refresh(&self, key: &M::Key) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let service = self.model.name();
        let entity = self.model.entity_id(key);

        {
            let state = self.state.lock();
            if state.shut_down {
                return Err(SyncError::ShutDown);
            }
            if let Some(binding) = state.binding.as_ref() {
                if binding.entity != entity {
                    warn!(
                        service,
                        bound = %binding.entity,
                        requested = %entity,
                        "refresh for an entity other than the bound one ignored"
                    );
                    return Ok(());
                }
            }
        }

        debug!(service, key = %entity, "refreshing");
        match self.model.fetch(self.backend.as_ref(), key, Source::Refresh) {
            Ok(transition) => {
                let _state = self.state.lock();
                self.publish(transition);
                Ok(())
            }
            Err(e) => {
                error!(service, key = %entity, error = %e, "refresh failed");
                let _state = self.state.lock();
                let recorded = self.connection.current().with_error(e.clone());
                self.connection.emit(recorded);
                Err(e)
            }
        }
    }

    /// Stop the feed and complete every stream. Idempotent.
    pub(crate) fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.state.lock().shut_down {
            return;
        }

        self.teardown_locked();
        self.state.lock().shut_down = true;

        self.value.complete();
        self.updates.complete();
        self.connection.complete();
        info!(service = self.model.name(), "service shut down");
    }

    /// Bind to `key` and return the binding's lease epoch. Caller holds
    /// the lifecycle lock.
    fn start_locked(self: &Arc<Self>, key: M::Key) -> Result<u64> {
        let service = self.model.name();
        let entity = self.model.entity_id(&key);

        let (previous, carried) = {
            let state = self.state.lock();
            if state.shut_down {
                return Err(SyncError::ShutDown);
            }
            match state.binding.as_ref() {
                Some(binding) if binding.entity == entity && binding.healthy => {
                    debug!(service, key = %entity, "stream already active");
                    return Ok(binding.epoch);
                }
                Some(binding) if binding.entity == entity => {
                    (Some(binding.entity.clone()), Some((binding.epoch, binding.leases)))
                }
                Some(binding) => (Some(binding.entity.clone()), None),
                None => (None, None),
            }
        };

        if let Some(previous) = previous {
            info!(service, from = %previous, to = %entity, "rebinding stream");
            self.teardown_locked();
        }

        info!(service, key = %entity, "starting stream");
        let initial = match self.model.fetch(self.backend.as_ref(), &key, Source::Initial) {
            Ok(transition) => transition,
            Err(e) => {
                error!(service, key = %entity, error = %e, "initial fetch failed");
                self.connection.emit(ConnectionState::failed(None, e.clone()));
                return Err(e);
            }
        };

        let (generation, epoch) = {
            let mut state = self.state.lock();
            state.generation += 1;
            let generation = state.generation;
            let (epoch, leases) = match carried {
                Some(carried) => carried,
                None => {
                    state.epochs += 1;
                    (state.epochs, 0)
                }
            };
            self.publish(initial);
            state.binding = Some(Binding {
                key: key.clone(),
                entity: entity.clone(),
                handle: None,
                generation,
                healthy: true,
                epoch,
                leases,
            });
            (generation, epoch)
        };

        let (table, filter) = self.model.feed_target(&key);
        debug!(service, table = %table, filter = %filter, "opening change feed");

        let events = Arc::downgrade(self);
        let on_event: EventCallback = Box::new(move |raw| {
            if let Some(manager) = events.upgrade() {
                manager.handle_event(generation, raw);
            }
        });
        let statuses = Arc::downgrade(self);
        let on_status: StatusCallback = Box::new(move |status| {
            if let Some(manager) = statuses.upgrade() {
                manager.handle_status(generation, status);
            }
        });

        match self
            .backend
            .subscribe_to_changes(&table, &filter, on_event, on_status)
        {
            Ok(handle) => {
                let orphan = {
                    let mut state = self.state.lock();
                    match state.binding.as_mut() {
                        Some(binding) if binding.generation == generation => {
                            binding.handle = Some(handle);
                            if binding.healthy {
                                self.connection.emit(ConnectionState::connected(entity.clone()));
                                info!(service, key = %entity, "stream live");
                            }
                            None
                        }
                        _ => Some(handle),
                    }
                };
                if let Some(handle) = orphan {
                    if let Err(e) = self.backend.unsubscribe(handle) {
                        warn!(service, key = %entity, error = %e, "failed to release superseded change feed");
                    }
                }
                Ok(epoch)
            }
            Err(e) => {
                error!(service, key = %entity, error = %e, "could not open change feed");
                self.state.lock().binding = None;
                self.connection.emit(ConnectionState::failed(None, e.clone()));
                Err(e)
            }
        }
    }

    /// Release the feed and reset the connection state. The synced value is
    /// kept. Caller holds the lifecycle lock.
    fn teardown_locked(&self) {
        let released = self.state.lock().binding.take();

        if let Some(binding) = released {
            if let Some(handle) = binding.handle {
                if let Err(e) = self.backend.unsubscribe(handle) {
                    warn!(
                        service = self.model.name(),
                        key = %binding.entity,
                        error = %e,
                        "failed to release change feed"
                    );
                }
            }
            info!(service = self.model.name(), key = %binding.entity, "stream stopped");
        }

        self.connection.emit(ConnectionState::idle());
    }

    // --- Feed Callbacks ---

    fn handle_event(&self, generation: u64, raw: serde_json::Value) {
        let service = self.model.name();
        let change = match ChangePayload::parse(raw) {
            Ok(change) => change,
            Err(e) => {
                warn!(service, error = %e, "dropping malformed change notification");
                return;
            }
        };

        let state = self.state.lock();
        let binding = match state.binding.as_ref() {
            Some(binding) if binding.generation == generation => binding,
            _ => {
                debug!(service, "ignoring notification from a released feed");
                return;
            }
        };

        let kind = change.event_type;
        debug!(service, key = %binding.entity, %kind, "change received");
        match self.model.apply(&binding.key, &self.value.current(), change) {
            Ok(transition) => {
                self.publish(transition);
                let touched = self.connection.current().touched();
                self.connection.emit(touched);
            }
            Err(e) => {
                warn!(service, key = %binding.entity, %kind, error = %e, "dropping unusable change notification");
            }
        }
    }

    fn handle_status(&self, generation: u64, status: ChannelStatus) {
        let service = self.model.name();
        let mut state = self.state.lock();
        let binding = match state.binding.as_mut() {
            Some(binding) if binding.generation == generation => binding,
            _ => return,
        };

        match status.as_error() {
            None => debug!(service, key = %binding.entity, "change feed subscribed"),
            Some(err) => {
                error!(service, key = %binding.entity, error = %err, "realtime channel failed");
                binding.healthy = false;
                self.connection
                    .emit(ConnectionState::failed(Some(binding.entity.clone()), err));
            }
        }
    }

    /// Emit a transition. Caller holds the state lock.
    fn publish(&self, transition: Transition<M::Value, M::Update>) {
        self.value.emit(transition.value);
        for update in transition.updates {
            self.updates.emit(update);
        }
        self.loaded.store(true, Ordering::SeqCst);
    }

    // --- Accessors ---

    pub(crate) fn value(&self) -> &ValueStore<M::Value> {
        &self.value
    }

    pub(crate) fn updates(&self) -> &EventStream<M::Update> {
        &self.updates
    }

    pub(crate) fn connection(&self) -> &ValueStore<ConnectionState> {
        &self.connection
    }

    pub(crate) fn has_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub(crate) fn bound_key(&self) -> Option<M::Key> {
        self.state.lock().binding.as_ref().map(|b| b.key.clone())
    }

    /// True while `epoch` is the lease epoch of the live binding.
    pub(crate) fn holds_epoch(&self, epoch: u64) -> bool {
        self.state
            .lock()
            .binding
            .as_ref()
            .map_or(false, |b| b.epoch == epoch)
    }

    pub(crate) fn lease_count(&self) -> usize {
        self.state.lock().binding.as_ref().map_or(0, |b| b.leases)
    }

    pub(crate) fn name(&self) -> &'static str {
        self.model.name()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl<M: SyncModel> Drop for SubscriptionManager<M> {
    fn drop(&mut self) {
        let binding = self.state.get_mut().binding.take();
        if let Some(Binding {
            entity,
            handle: Some(handle),
            ..
        }) = binding
        {
            if let Err(e) = self.backend.unsubscribe(handle) {
                warn!(service = self.model.name(), key = %entity, error = %e, "failed to release change feed on drop");
            }
        }
    }
}
