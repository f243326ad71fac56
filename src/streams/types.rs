//! Subscription handle for store streams.

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::hub::Hub;

/// Unique identifier for a stream subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to a stream subscription.
///
/// Dropping the handle unsubscribes; other subscribers are unaffected. A
/// subscriber that falls `buffer_size` emissions behind is never detached:
/// its oldest pending emissions are evicted and counted in [`missed`].
///
/// [`missed`]: Subscription::missed
pub struct Subscription<T: Clone + Send + 'static> {
    id: SubscriptionId,
    receiver: Receiver<T>,
    missed: Arc<AtomicU64>,
    hub: Weak<Hub<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: Receiver<T>,
        missed: Arc<AtomicU64>,
        hub: Weak<Hub<T>>,
    ) -> Self {
        Self {
            id,
            receiver,
            missed,
            hub,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next emission (blocking).
    pub fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an emission (non-blocking).
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every emission already buffered.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Wait for an emission, then keep reading until the stream has been
    /// quiet for `quiet`; returns the last value of the burst.
    ///
    /// Returns `None` if the stream ended before anything arrived.
    pub fn recv_settled(&self, quiet: Duration) -> Option<T> {
        let mut last = self.receiver.recv().ok()?;
        loop {
            match self.receiver.recv_timeout(quiet) {
                Ok(value) => last = value,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Some(last)
                }
            }
        }
    }

    /// Emissions evicted unread because this subscriber lagged. The most
    /// recent emissions are always kept.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::SeqCst)
    }

    /// True once the stream has completed and every buffered emission has
    /// been read.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_empty() && self.hub.upgrade().map_or(true, |hub| hub.is_completed())
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
