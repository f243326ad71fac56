//! Connection state reported by a sync service.

use crate::error::SyncError;
use crate::types::Timestamp;

/// The subscription manager's view of its live feed.
///
/// `is_connected` implies `bound_key.is_some()`; the constructors below are
/// the only way the manager builds a state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionState {
    pub is_connected: bool,
    /// Entity the feed is bound to (account id or user id).
    pub bound_key: Option<String>,
    pub last_update: Option<Timestamp>,
    pub error: Option<SyncError>,
}

impl ConnectionState {
    /// No binding.
    pub fn idle() -> Self {
        Self {
            last_update: Some(Timestamp::now()),
            ..Self::default()
        }
    }

    /// Live feed bound to `entity`.
    pub fn connected(entity: impl Into<String>) -> Self {
        Self {
            is_connected: true,
            bound_key: Some(entity.into()),
            last_update: Some(Timestamp::now()),
            error: None,
        }
    }

    /// A failure, optionally while still bound to an entity.
    pub fn failed(bound_key: Option<String>, error: SyncError) -> Self {
        Self {
            is_connected: false,
            bound_key,
            last_update: Some(Timestamp::now()),
            error: Some(error),
        }
    }

    /// Same state with `last_update` refreshed.
    pub fn touched(&self) -> Self {
        Self {
            last_update: Some(Timestamp::now()),
            ..self.clone()
        }
    }

    /// Same state with an error recorded.
    pub fn with_error(&self, error: SyncError) -> Self {
        Self {
            error: Some(error),
            last_update: Some(Timestamp::now()),
            ..self.clone()
        }
    }
}

/// How current a displayed value is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// No value loaded yet.
    Loading,
    /// A value is present but the feed is not live.
    Stale,
    /// A value is present and the feed is live.
    Live,
}

impl Freshness {
    pub fn of(has_value: bool, connection: &ConnectionState) -> Self {
        match (has_value, connection.is_connected) {
            (false, _) => Freshness::Loading,
            (true, false) => Freshness::Stale,
            (true, true) => Freshness::Live,
        }
    }
}
