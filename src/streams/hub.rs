//! Fan-out broadcaster backing every store.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{Subscription, SubscriptionId};

pub(crate) type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Internal subscriber state.
struct Subscriber<T> {
    sender: Sender<T>,
    /// Second handle on the subscriber's queue, used to evict the oldest
    /// pending emission when the queue is full.
    evict: Receiver<T>,
    filter: Option<Predicate<T>>,
    /// Emissions evicted before the subscriber read them.
    missed: Arc<AtomicU64>,
}

/// Outcome of a non-blocking send.
enum Delivery {
    Sent,
    Full,
    Gone,
}

impl<T: Clone> Subscriber<T> {
    fn matches(&self, value: &T) -> bool {
        self.filter.as_ref().map_or(true, |f| f(value))
    }

    fn try_send(&self, value: T) -> Delivery {
        match self.sender.try_send(value) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Disconnected(_)) => Delivery::Gone,
        }
    }

    /// Deliver `value`, evicting the oldest pending emission if the queue
    /// is full. The subscriber stays attached either way.
    fn deliver(&self, value: T) -> Delivery {
        match self.try_send(value.clone()) {
            Delivery::Full => {
                if self.evict.try_recv().is_ok() {
                    self.missed.fetch_add(1, Ordering::SeqCst);
                }
                match self.try_send(value) {
                    Delivery::Sent => Delivery::Full,
                    other => other,
                }
            }
            other => other,
        }
    }
}

struct HubState<T> {
    /// Last accepted emission, replayed to new subscribers.
    latest: Option<T>,
    subscribers: HashMap<SubscriptionId, Subscriber<T>>,
    completed: bool,
}

/// Replay-1 broadcaster.
///
/// Emissions are delivered while the state lock is held, so every
/// subscriber observes them in emission order and a new subscriber never
/// misses or duplicates the value current at the moment it subscribed.
pub(crate) struct Hub<T> {
    name: &'static str,
    state: Mutex<HubState<T>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl<T: Clone + Send + 'static> Hub<T> {
    pub(crate) fn new(name: &'static str, buffer_size: usize, initial: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(HubState {
                latest: initial,
                subscribers: HashMap::new(),
                completed: false,
            }),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        })
    }

    /// Register a subscriber. It immediately receives the latest value (if
    /// any and if it passes the filter), then every later emission.
    pub(crate) fn subscribe(self: &Arc<Self>, filter: Option<Predicate<T>>) -> Subscription<T> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);

        let missed = Arc::new(AtomicU64::new(0));

        let mut state = self.state.lock();
        if !state.completed {
            let subscriber = Subscriber {
                sender,
                evict: receiver.clone(),
                filter,
                missed: Arc::clone(&missed),
            };
            if let Some(latest) = state.latest.as_ref() {
                if subscriber.matches(latest) {
                    // Fresh channel with capacity >= 1: cannot be full.
                    let _ = subscriber.try_send(latest.clone());
                }
            }
            state.subscribers.insert(id, subscriber);
        }
        // On a completed hub the sender goes out of scope unused, so the
        // receiver reports disconnection straight away.
        drop(state);

        Subscription::new(id, receiver, missed, Arc::downgrade(self))
    }

    /// Publish a value if `accept(previous, next)` allows it.
    ///
    /// Returns false when the value was rejected or the hub is completed.
    pub(crate) fn publish_with<F>(&self, value: T, accept: F) -> bool
    where
        F: FnOnce(Option<&T>, &T) -> bool,
    {
        let mut state = self.state.lock();
        if state.completed || !accept(state.latest.as_ref(), &value) {
            return false;
        }

        let mut to_remove = Vec::new();
        for (id, sub) in state.subscribers.iter() {
            if !sub.matches(&value) {
                continue;
            }
            match sub.deliver(value.clone()) {
                Delivery::Sent => {}
                Delivery::Full => {
                    if sub.missed.load(Ordering::SeqCst) == 1 {
                        tracing::warn!(stream = self.name, subscription = id.0, "subscriber lagging, evicting oldest emissions");
                    }
                }
                Delivery::Gone => to_remove.push(*id),
            }
        }
        for id in to_remove {
            state.subscribers.remove(&id);
        }

        state.latest = Some(value);
        true
    }

    pub(crate) fn latest(&self) -> Option<T> {
        self.state.lock().latest.clone()
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subscribers.remove(&id);
    }

    /// End the stream. Live receivers see disconnection once drained.
    pub(crate) fn complete(&self) {
        let mut state = self.state.lock();
        if !state.completed {
            state.completed = true;
            state.subscribers.clear();
            tracing::debug!(stream = self.name, "stream completed");
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}
