//! Backend collaborator contract.
//!
//! A [`Backend`] answers point and list queries and opens server-filtered
//! change feeds. Feeds push raw JSON notifications shaped like
//!
//! ```text
//! { "eventType": "INSERT" | "UPDATE" | "DELETE", "old": {..}, "new": {..} }
//! ```
//!
//! plus lifecycle [`ChannelStatus`] signals. Parsing the notification is
//! left to the subscriber so a malformed payload can be dropped without
//! affecting the rest of the stream.

mod memory;

pub use memory::{FeedOp, MemoryBackend};

use crate::error::{Result, SyncError};
use crate::types::ChangeKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Equality filter on one column (`column=eq.value`).
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether a row satisfies the filter.
    pub fn matches(&self, row: &serde_json::Value) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            serde_json::Value::String(s) => write!(f, "{}=eq.{}", self.column, s),
            other => write!(f, "{}=eq.{}", self.column, other),
        }
    }
}

/// Sort order for list queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }
}

/// Lifecycle signal of a change feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

impl ChannelStatus {
    /// The error this status represents, if it reports a health failure.
    pub fn as_error(&self) -> Option<SyncError> {
        match self {
            ChannelStatus::Subscribed => None,
            ChannelStatus::ChannelError(msg) => Some(SyncError::Channel(msg.clone())),
            ChannelStatus::TimedOut => Some(SyncError::ChannelTimeout),
            ChannelStatus::Closed => Some(SyncError::ChannelClosed),
        }
    }
}

/// A parsed row-level change notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    pub event_type: ChangeKind,
    #[serde(default)]
    pub old: serde_json::Value,
    #[serde(default)]
    pub new: serde_json::Value,
}

impl ChangePayload {
    pub fn insert(row: serde_json::Value) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            old: serde_json::json!({}),
            new: row,
        }
    }

    pub fn update(old: serde_json::Value, new: serde_json::Value) -> Self {
        Self {
            event_type: ChangeKind::Update,
            old,
            new,
        }
    }

    pub fn delete(old: serde_json::Value) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            old,
            new: serde_json::json!({}),
        }
    }

    /// Parse a raw notification.
    pub fn parse(raw: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    /// The new row, unless absent or empty.
    pub fn new_row(&self) -> Option<&serde_json::Value> {
        non_empty(&self.new)
    }

    /// The old row, unless absent or empty.
    pub fn old_row(&self) -> Option<&serde_json::Value> {
        non_empty(&self.old)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn non_empty(row: &serde_json::Value) -> Option<&serde_json::Value> {
    match row {
        serde_json::Value::Null => None,
        serde_json::Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    }
}

/// Unique identifier for an open feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

/// Handle to an open change feed. Released with [`Backend::unsubscribe`].
#[derive(Debug, PartialEq, Eq)]
pub struct FeedHandle {
    pub id: FeedId,
    pub table: String,
}

/// Receives raw change notifications.
pub type EventCallback = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// Receives feed lifecycle signals.
pub type StatusCallback = Box<dyn Fn(ChannelStatus) + Send + Sync>;

/// Query and change-feed API of the hosted database.
pub trait Backend: Send + Sync {
    /// Point lookup. Errors with [`SyncError::NotFound`] when no row matches.
    fn fetch_one(&self, table: &str, filter: &Filter) -> Result<serde_json::Value>;

    /// List query.
    fn fetch_many(
        &self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
    ) -> Result<Vec<serde_json::Value>>;

    /// Open a server-filtered change feed.
    ///
    /// Callbacks may run on any thread, including the caller's before this
    /// method returns.
    fn subscribe_to_changes(
        &self,
        table: &str,
        filter: &Filter,
        on_event: EventCallback,
        on_status: StatusCallback,
    ) -> Result<FeedHandle>;

    /// Release a feed. No callback fires for it once this returns.
    fn unsubscribe(&self, handle: FeedHandle) -> Result<()>;
}
