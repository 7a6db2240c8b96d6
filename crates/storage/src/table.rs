//! Generic resource-table contract for the remote data store.

use std::sync::Mutex;

use async_trait::async_trait;
use course_core::model::{ChangeKind, EventFilter, Resource};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::ids::{RawId, json_values_equal};
use crate::repository::StorageError;

/// A record in a resource: a JSON object.
pub type Row = Map<String, Value>;

/// Name of the primary key column on every resource.
pub const ID_COLUMN: &str = "id";

//
// ─── FILTERS ──────────────────────────────────────────────────────────────────
//

/// Conjunction of column equalities. An empty filter matches every row.
///
/// A missing column compares as `null`; ids compare by normalized text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    #[must_use]
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            let actual = row.get(column).unwrap_or(&Value::Null);
            json_values_equal(actual, expected)
        })
    }

    /// Builds a filter matching `row` on the given columns.
    #[must_use]
    pub fn on_columns(row: &Row, columns: &[&str]) -> Self {
        columns.iter().fold(Self::new(), |filter, column| {
            filter.eq(*column, row.get(*column).cloned().unwrap_or(Value::Null))
        })
    }
}

/// Reads the numeric primary key of a row, if it has one.
///
/// # Errors
///
/// Returns `StorageError::Serialization` when the id is present but not a
/// non-negative integer.
pub fn row_id(row: &Row) -> Result<Option<u64>, StorageError> {
    let Some(value) = row.get(ID_COLUMN) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let raw = RawId::from_json(value)
        .ok_or_else(|| StorageError::Serialization(format!("invalid id: {value}")))?;
    match crate::ids::to_number(raw) {
        RawId::Number(n) => u64::try_from(n)
            .map(Some)
            .map_err(|_| StorageError::Serialization(format!("negative id: {n}"))),
        RawId::Text(t) => Err(StorageError::Serialization(format!("non-numeric id: {t}"))),
    }
}

/// Applies a partial update. The primary key is never overwritten.
pub fn merge_patch(row: &mut Row, patch: &Row) {
    for (column, value) in patch {
        if column != ID_COLUMN {
            row.insert(column.clone(), value.clone());
        }
    }
}

//
// ─── CHANGE FEED ──────────────────────────────────────────────────────────────
//

/// A change notification emitted by the store after a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub resource: Resource,
    /// The row after the change (the removed row for deletes).
    pub record: Value,
}

/// What a subscriber asks the store to send.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    pub resource: Resource,
    pub events: EventFilter,
    /// Server-side row filter, e.g. `user_id = <id>`.
    pub rows: Filter,
}

impl ChangeRequest {
    #[must_use]
    pub fn new(resource: Resource, events: EventFilter) -> Self {
        Self {
            resource,
            events,
            rows: Filter::new(),
        }
    }

    #[must_use]
    pub fn with_rows(mut self, rows: Filter) -> Self {
        self.rows = rows;
        self
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        self.resource == event.resource
            && self.events.matches(event.kind)
            && event
                .record
                .as_object()
                .is_some_and(|row| self.rows.matches(row))
    }
}

pub type ChangeReceiver = mpsc::UnboundedReceiver<ChangeEvent>;

struct Subscriber {
    request: ChangeRequest,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct HubState {
    subscribers: Vec<Subscriber>,
    closed: bool,
}

/// Fans committed changes out to subscribers whose request accepts them.
///
/// Each subscriber gets its own unbounded channel, so events for one
/// subscription arrive in the order they were published.
#[derive(Default)]
pub struct ChangeHub {
    state: Mutex<HubState>,
}

impl ChangeHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` once the hub has been closed.
    pub fn register(&self, request: ChangeRequest) -> Result<ChangeReceiver, StorageError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if state.closed {
            return Err(StorageError::Connection("change feed is closed".into()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        debug!(
            resource = %request.resource,
            events = ?request.events,
            "change subscriber registered"
        );
        state.subscribers.push(Subscriber { request, sender });
        Ok(receiver)
    }

    pub fn publish(&self, event: &ChangeEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.subscribers.retain(|subscriber| {
            if subscriber.sender.is_closed() {
                return false;
            }
            if subscriber.request.accepts(event) {
                trace!(resource = %event.resource, kind = %event.kind, "delivering change");
                return subscriber.sender.send(event.clone()).is_ok();
            }
            true
        });
    }

    /// Drops every subscriber and refuses new ones. Open receivers see the
    /// end of their stream.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.subscribers.clear();
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .subscribers
                    .iter()
                    .filter(|s| !s.sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }
}

//
// ─── STORE CONTRACT ───────────────────────────────────────────────────────────
//

/// Table-level access to the remote store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Rows of `resource` matching `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    async fn select(&self, resource: &Resource, filter: &Filter) -> Result<Vec<Row>, StorageError>;

    /// Inserts a row, assigning an id when the row has none. Returns the
    /// stored row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id is taken.
    async fn insert(&self, resource: &Resource, row: Row) -> Result<Row, StorageError>;

    /// Merges `patch` into every matching row and returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    async fn update(
        &self,
        resource: &Resource,
        filter: &Filter,
        patch: Row,
    ) -> Result<u64, StorageError>;

    /// Updates the row matching `row` on `conflict` columns, or inserts it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    async fn upsert(
        &self,
        resource: &Resource,
        row: Row,
        conflict: &[&str],
    ) -> Result<Row, StorageError>;

    /// Removes matching rows and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    async fn delete(&self, resource: &Resource, filter: &Filter) -> Result<u64, StorageError>;

    /// Opens a change channel for `request`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the channel cannot be established.
    async fn subscribe(&self, request: ChangeRequest) -> Result<ChangeReceiver, StorageError>;
}
