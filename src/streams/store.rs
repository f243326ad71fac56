//! Latest-value stores and event streams.

use std::fmt;
use std::sync::Arc;

use super::hub::Hub;
use super::types::Subscription;
use crate::config::{SyncConfig, DEFAULT_BUFFER_SIZE};

/// Replayable latest-value store.
///
/// `current()` never blocks; a new subscriber immediately receives the
/// current value, then every accepted emission. With distinct emission
/// enabled, a value equal to the current one is suppressed.
pub struct ValueStore<T: Clone + Send + 'static> {
    hub: Arc<Hub<T>>,
    distinct: bool,
}

impl<T> ValueStore<T>
where
    T: Clone + PartialEq + Default + Send + 'static,
{
    pub fn new(name: &'static str, initial: T) -> Self {
        Self::with_options(name, initial, DEFAULT_BUFFER_SIZE, true)
    }

    pub fn from_config(name: &'static str, initial: T, config: &SyncConfig) -> Self {
        Self::with_options(name, initial, config.buffer_size, config.distinct_values)
    }

    pub fn with_options(name: &'static str, initial: T, buffer_size: usize, distinct: bool) -> Self {
        Self {
            hub: Hub::new(name, buffer_size, Some(initial)),
            distinct,
        }
    }

    /// Latest value. Still readable after completion.
    pub fn current(&self) -> T {
        self.hub.latest().unwrap_or_default()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.hub.subscribe(None)
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.hub.subscribe(Some(Box::new(filter)))
    }

    /// Push a value. Returns whether it was delivered.
    pub fn emit(&self, value: T) -> bool {
        let distinct = self.distinct;
        self.hub
            .publish_with(value, |prev, next| !(distinct && prev == Some(next)))
    }

    /// Apply `f` to the current value and emit the result.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(T) -> T,
    {
        self.emit(f(self.current()))
    }

    pub fn complete(&self) {
        self.hub.complete();
    }

    pub fn is_completed(&self) -> bool {
        self.hub.is_completed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

impl<T: Clone + Send + 'static> Clone for ValueStore<T> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            distinct: self.distinct,
        }
    }
}

impl<T: Clone + Send + fmt::Debug + 'static> fmt::Debug for ValueStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStore")
            .field("current", &self.hub.latest())
            .field("distinct", &self.distinct)
            .finish()
    }
}

/// Broadcast stream of discrete events.
///
/// Every emission is delivered; nothing is suppressed. A late subscriber
/// receives only the most recent event, then live ones.
pub struct EventStream<T: Clone + Send + 'static> {
    hub: Arc<Hub<T>>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_buffer(name, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer(name: &'static str, buffer_size: usize) -> Self {
        Self {
            hub: Hub::new(name, buffer_size, None),
        }
    }

    /// Most recent event, if any was emitted.
    pub fn latest(&self) -> Option<T> {
        self.hub.latest()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.hub.subscribe(None)
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.hub.subscribe(Some(Box::new(filter)))
    }

    pub fn emit(&self, event: T) -> bool {
        self.hub.publish_with(event, |_, _| true)
    }

    pub fn complete(&self) {
        self.hub.complete();
    }

    pub fn is_completed(&self) -> bool {
        self.hub.is_completed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

impl<T: Clone + Send + 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_late_subscriber_gets_current() {
        let store = ValueStore::new("test", 1);
        store.emit(2);
        store.emit(3);

        let sub = store.subscribe();
        assert_eq!(sub.drain(), vec![3]);
        assert_eq!(store.current(), 3);
    }

    #[test]
    fn test_distinct_until_changed() {
        let store = ValueStore::new("test", 0.0_f64);
        let sub = store.subscribe();

        assert!(store.emit(100.0));
        assert!(!store.emit(100.0));
        assert!(store.emit(50.0));

        assert_eq!(sub.drain(), vec![0.0, 100.0, 50.0]);
    }

    #[test]
    fn test_non_distinct_store_repeats() {
        let store = ValueStore::with_options("test", 0, 8, false);
        let sub = store.subscribe();
        store.emit(5);
        store.emit(5);
        assert_eq!(sub.drain(), vec![0, 5, 5]);
    }

    #[test]
    fn test_unsubscribe_one_keeps_others() {
        let store = ValueStore::new("test", 0);
        let a = store.subscribe();
        let b = store.subscribe();
        assert_eq!(store.subscriber_count(), 2);

        drop(a);
        assert_eq!(store.subscriber_count(), 1);

        store.emit(7);
        assert_eq!(b.drain(), vec![0, 7]);
    }

    #[test]
    fn test_complete_rejects_and_disconnects() {
        let store = ValueStore::new("test", 1);
        let live = store.subscribe();
        store.complete();

        assert!(!store.emit(2));
        assert_eq!(store.current(), 1);

        // Buffered value is still readable, then the stream ends.
        assert_eq!(live.recv().unwrap(), 1);
        assert!(live.recv().is_err());
        assert!(live.is_closed());

        let late = store.subscribe();
        assert!(late.recv_timeout(Duration::from_millis(20)).is_err());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_keeps_latest() {
        let store = ValueStore::with_options("test", 0, 2, true);
        let slow = store.subscribe();

        for i in 1..10 {
            store.emit(i);
        }

        assert_eq!(store.subscriber_count(), 1);
        assert_eq!(slow.drain(), vec![8, 9]);
        assert_eq!(slow.missed(), 8);

        store.emit(10);
        assert_eq!(slow.drain(), vec![10]);
    }

    #[test]
    fn test_lagging_event_subscriber_stays_attached() {
        let events = EventStream::with_buffer("events", 4);
        let lagging = events.subscribe();

        for n in 0..100 {
            events.emit(n);
        }
        assert_eq!(lagging.drain(), vec![96, 97, 98, 99]);
        assert_eq!(lagging.missed(), 96);

        events.emit(100);
        assert_eq!(lagging.drain(), vec![100]);
        assert_eq!(events.subscriber_count(), 1);
    }

    #[test]
    fn test_event_stream_never_suppresses() {
        let events = EventStream::new("events");
        assert!(events.latest().is_none());

        let sub = events.subscribe();
        events.emit("a");
        events.emit("a");
        assert_eq!(sub.drain(), vec!["a", "a"]);

        let late = events.subscribe();
        assert_eq!(late.drain(), vec!["a"]);
    }

    #[test]
    fn test_filtered_subscription() {
        let events = EventStream::new("events");
        let evens = events.subscribe_filtered(|n: &i32| n % 2 == 0);

        for n in 1..=6 {
            events.emit(n);
        }
        assert_eq!(evens.drain(), vec![2, 4, 6]);
    }

    #[test]
    fn test_recv_settled_returns_last_of_burst() {
        let events = EventStream::new("events");
        let sub = events.subscribe();
        for n in 0..5 {
            events.emit(n);
        }
        assert_eq!(sub.recv_settled(Duration::from_millis(20)), Some(4));
    }

    #[test]
    fn test_update_applies_to_current() {
        let store = ValueStore::new("test", vec![1]);
        store.update(|mut v| {
            v.insert(0, 2);
            v
        });
        assert_eq!(store.current(), vec![2, 1]);
    }
}
