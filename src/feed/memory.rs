//! In-process backend with live change feeds.

use super::{
    Backend, ChangePayload, ChannelStatus, EventCallback, FeedHandle, FeedId, Filter, OrderBy,
    StatusCallback,
};
use crate::error::{Result, SyncError};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Column identifying a row.
const ID_COLUMN: &str = "id";

/// Open feed state.
struct Feed {
    table: String,
    filter: Filter,
    on_event: EventCallback,
    on_status: StatusCallback,
}

impl Feed {
    /// Check if this feed observes a change. The old row is consulted for
    /// deletes, which carry no new row.
    fn matches(&self, table: &str, payload: &ChangePayload) -> bool {
        if self.table != table {
            return false;
        }
        payload
            .new_row()
            .or_else(|| payload.old_row())
            .map_or(false, |row| self.filter.matches(row))
    }
}

/// Feed lifecycle operation, recorded in order.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedOp {
    Opened {
        id: FeedId,
        table: String,
        filter: Filter,
    },
    Released {
        id: FeedId,
    },
}

/// Backend holding tables of JSON rows in memory.
///
/// Mutations broadcast change notifications to every open feed whose filter
/// matches, on the mutating thread. Failures, raw payloads and channel
/// status signals can be injected to exercise the subscriber's error paths.
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Vec<serde_json::Value>>>,
    feeds: RwLock<HashMap<FeedId, Arc<Feed>>>,
    next_id: AtomicU64,

    fetch_failures: Mutex<HashMap<String, SyncError>>,
    subscribe_failures: Mutex<HashMap<String, SyncError>>,

    fetches: AtomicUsize,
    max_live_feeds: AtomicUsize,
    log: Mutex<Vec<FeedOp>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            feeds: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fetch_failures: Mutex::new(HashMap::new()),
            subscribe_failures: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            max_live_feeds: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    // --- Table Mutations ---

    /// Store a row without notifying feeds.
    pub fn seed(&self, table: &str, row: serde_json::Value) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Insert a row and broadcast an INSERT.
    pub fn insert(&self, table: &str, row: serde_json::Value) {
        self.seed(table, row.clone());
        self.broadcast(table, ChangePayload::insert(row));
    }

    /// Replace the row with the same id and broadcast an UPDATE.
    pub fn update(&self, table: &str, row: serde_json::Value) -> Result<()> {
        let id = row_id(&row)?;
        let old = {
            let mut tables = self.tables.write();
            let rows = tables.entry(table.to_string()).or_default();
            let slot = rows
                .iter_mut()
                .find(|r| r.get(ID_COLUMN) == Some(&id))
                .ok_or_else(|| not_found(table, &id))?;
            std::mem::replace(slot, row.clone())
        };
        self.broadcast(table, ChangePayload::update(old, row));
        Ok(())
    }

    /// Remove the row with the given id and broadcast a DELETE.
    pub fn delete(&self, table: &str, id: &str) -> Result<()> {
        let id = serde_json::Value::from(id);
        let old = {
            let mut tables = self.tables.write();
            let rows = tables.entry(table.to_string()).or_default();
            let pos = rows
                .iter()
                .position(|r| r.get(ID_COLUMN) == Some(&id))
                .ok_or_else(|| not_found(table, &id))?;
            rows.remove(pos)
        };
        self.broadcast(table, ChangePayload::delete(old));
        Ok(())
    }

    /// Deliver a raw notification to every feed on the table, unfiltered.
    pub fn inject_raw(&self, table: &str, raw: serde_json::Value) {
        for feed in self.feeds_for(|feed| feed.table == table) {
            (feed.on_event)(raw.clone());
        }
    }

    /// Signal a lifecycle status to every feed on the table.
    pub fn emit_status(&self, table: &str, status: ChannelStatus) {
        for feed in self.feeds_for(|feed| feed.table == table) {
            (feed.on_status)(status.clone());
        }
    }

    // --- Failure Injection ---

    /// Make every fetch from `table` fail with `error` until cleared.
    pub fn fail_fetches(&self, table: &str, error: SyncError) {
        self.fetch_failures.lock().insert(table.to_string(), error);
    }

    /// Make every feed subscription on `table` fail with `error` until cleared.
    pub fn fail_subscriptions(&self, table: &str, error: SyncError) {
        self.subscribe_failures.lock().insert(table.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.fetch_failures.lock().clear();
        self.subscribe_failures.lock().clear();
    }

    // --- Inspection ---

    /// Number of fetch calls served (failed ones included).
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn live_feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    /// Highest number of simultaneously open feeds observed.
    pub fn max_live_feeds(&self) -> usize {
        self.max_live_feeds.load(Ordering::SeqCst)
    }

    /// Feed open/release operations in the order they happened.
    pub fn feed_log(&self) -> Vec<FeedOp> {
        self.log.lock().clone()
    }

    pub fn rows(&self, table: &str) -> Vec<serde_json::Value> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    // --- Internal ---

    /// Snapshot matching feeds so callbacks run without holding the lock.
    fn feeds_for<F>(&self, predicate: F) -> Vec<Arc<Feed>>
    where
        F: Fn(&Feed) -> bool,
    {
        self.feeds
            .read()
            .values()
            .filter(|feed| predicate(feed))
            .cloned()
            .collect()
    }

    fn broadcast(&self, table: &str, payload: ChangePayload) {
        let raw = payload.to_value();
        for feed in self.feeds_for(|feed| feed.matches(table, &payload)) {
            (feed.on_event)(raw.clone());
        }
    }

    fn check_failure(
        failures: &Mutex<HashMap<String, SyncError>>,
        table: &str,
    ) -> Result<()> {
        match failures.lock().get(table) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn matching_rows(&self, table: &str, filter: &Filter) -> Vec<serde_json::Value> {
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn fetch_one(&self, table: &str, filter: &Filter) -> Result<serde_json::Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Self::check_failure(&self.fetch_failures, table)?;

        self.matching_rows(table, filter)
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::NotFound {
                table: table.to_string(),
                filter: filter.to_string(),
            })
    }

    fn fetch_many(
        &self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
    ) -> Result<Vec<serde_json::Value>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Self::check_failure(&self.fetch_failures, table)?;

        let mut rows = self.matching_rows(table, filter);
        // Stable sort keeps insertion order among equal keys.
        rows.sort_by(|a, b| {
            let ord = compare_json(a.get(&order.column), b.get(&order.column));
            if order.descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(rows)
    }

    fn subscribe_to_changes(
        &self,
        table: &str,
        filter: &Filter,
        on_event: EventCallback,
        on_status: StatusCallback,
    ) -> Result<FeedHandle> {
        Self::check_failure(&self.subscribe_failures, table)?;

        let id = FeedId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let feed = Arc::new(Feed {
            table: table.to_string(),
            filter: filter.clone(),
            on_event,
            on_status,
        });

        {
            let mut feeds = self.feeds.write();
            feeds.insert(id, Arc::clone(&feed));
            self.max_live_feeds.fetch_max(feeds.len(), Ordering::SeqCst);
        }
        self.log.lock().push(FeedOp::Opened {
            id,
            table: table.to_string(),
            filter: filter.clone(),
        });

        (feed.on_status)(ChannelStatus::Subscribed);

        Ok(FeedHandle {
            id,
            table: table.to_string(),
        })
    }

    fn unsubscribe(&self, handle: FeedHandle) -> Result<()> {
        let removed = self.feeds.write().remove(&handle.id);
        match removed {
            Some(feed) => {
                self.log.lock().push(FeedOp::Released { id: handle.id });
                (feed.on_status)(ChannelStatus::Closed);
                Ok(())
            }
            None => Err(SyncError::Backend(format!(
                "feed {} on {} is not open",
                handle.id.0, handle.table
            ))),
        }
    }
}

fn row_id(row: &serde_json::Value) -> Result<serde_json::Value> {
    row.get(ID_COLUMN)
        .cloned()
        .ok_or_else(|| SyncError::Parse(format!("row has no {} column", ID_COLUMN)))
}

fn not_found(table: &str, id: &serde_json::Value) -> SyncError {
    SyncError::NotFound {
        table: table.to_string(),
        filter: format!("{}=eq.{}", ID_COLUMN, id),
    }
}

/// Order JSON scalars: nulls first, then numbers, then strings.
fn compare_json(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> CmpOrdering {
    use serde_json::Value;

    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
