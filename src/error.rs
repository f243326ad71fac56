//! Error types for the sync layer.

use thiserror::Error;

/// Main error type for sync operations.
///
/// Errors are cloneable so the most recent one can be carried inside a
/// [`ConnectionState`](crate::sync::ConnectionState) snapshot.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Fetch from {table} failed: {message}")]
    Fetch { table: String, message: String },

    #[error("No record in {table} matching {filter}")]
    NotFound { table: String, filter: String },

    #[error("Realtime channel error: {0}")]
    Channel(String),

    #[error("Realtime channel timed out")]
    ChannelTimeout,

    #[error("Realtime channel closed")]
    ChannelClosed,

    #[error("Malformed payload: {0}")]
    Parse(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Service has been shut down")]
    ShutDown,
}

impl SyncError {
    /// Build a fetch error for the given table.
    pub fn fetch(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Fetch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// True for errors describing the health of the live channel.
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            SyncError::Channel(_) | SyncError::ChannelTimeout | SyncError::ChannelClosed
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Parse(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
