//! What a sync service keeps in sync.

use crate::error::Result;
use crate::feed::{Backend, ChangePayload, Filter};
use crate::types::Source;
use std::fmt;

/// A new synced value together with the events describing how it came about.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition<V, U> {
    pub value: V,
    pub updates: Vec<U>,
}

/// Domain half of a sync service.
///
/// The subscription manager owns lifecycle, locking and the streams; a model
/// says which rows to fetch and watch and how a change notification turns
/// into a new value.
pub trait SyncModel: Send + Sync + 'static {
    /// Identifiers passed to `start`.
    type Key: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    /// The synced value (scalar or collection).
    type Value: Clone + PartialEq + Default + fmt::Debug + Send + Sync + 'static;
    /// Event emitted on the updates stream.
    type Update: Clone + fmt::Debug + Send + Sync + 'static;

    /// Short name used in log fields and stream names.
    fn name(&self) -> &'static str;

    /// Identity of the entity the key binds to. Two keys with the same
    /// entity share one feed.
    fn entity_id(&self, key: &Self::Key) -> String;

    /// Table and server-side filter for the change feed.
    fn feed_target(&self, key: &Self::Key) -> (String, Filter);

    /// Load the current value from the backend.
    fn fetch(
        &self,
        backend: &dyn Backend,
        key: &Self::Key,
        source: Source,
    ) -> Result<Transition<Self::Value, Self::Update>>;

    /// Apply one change notification to the current value.
    ///
    /// An error means the notification is unusable; it is dropped.
    fn apply(
        &self,
        key: &Self::Key,
        current: &Self::Value,
        change: ChangePayload,
    ) -> Result<Transition<Self::Value, Self::Update>>;

    /// Origin of an update.
    fn source_of(update: &Self::Update) -> Source;
}
