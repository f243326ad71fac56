//! Core types shared by the stores, the feed and the models.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                $name(id)
            }
        }
    };
}

string_id!(
    /// Identifier of an authenticated user.
    UserId
);
string_id!(
    /// Identifier of a bank account.
    AccountId
);
string_id!(
    /// Identifier of a ledger transaction.
    TransactionId
);

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Integer amount in minor currency units (centavos).
///
/// Amounts live upstream as cents and are only converted to major units
/// when a row crosses into the local view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(pub i64);

impl Cents {
    /// Amount in major units (reais). Exact for every amount a double can
    /// represent to the cent.
    pub fn to_major(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Read a cents column from a row. Missing and null read as zero.
    pub fn from_field(row: &serde_json::Value, field: &str) -> Result<Self> {
        match row.get(field) {
            None | Some(serde_json::Value::Null) => Ok(Cents(0)),
            Some(serde_json::Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    Ok(Cents(v))
                } else {
                    match n.as_f64() {
                        // i64::MAX as f64 is 2^63, one past the range.
                        Some(v)
                            if v.fract() == 0.0
                                && v >= i64::MIN as f64
                                && v < i64::MAX as f64 =>
                        {
                            Ok(Cents(v as i64))
                        }
                        _ => Err(SyncError::Parse(format!(
                            "{} is not an integer amount: {}",
                            field, n
                        ))),
                    }
                }
            }
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Cents)
                .map_err(|_| SyncError::Parse(format!("{} is not an integer amount: {:?}", field, s))),
            Some(other) => Err(SyncError::Parse(format!(
                "{} has unexpected shape: {}",
                field, other
            ))),
        }
    }
}

/// Where a change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Pushed by the realtime change feed.
    Realtime,
    /// Loaded by the initial fetch of `start`.
    Initial,
    /// Loaded by a manual refresh.
    Refresh,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Realtime => "realtime",
            Source::Initial => "initial",
            Source::Refresh => "refresh",
        })
    }
}

/// Row-level change kind reported by the feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        })
    }
}
