use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use course_core::model::{ChangeKind, Resource};
use serde_json::Value;

use crate::repository::StorageError;
use crate::table::{
    ChangeEvent, ChangeHub, ChangeReceiver, ChangeRequest, Filter, ID_COLUMN, ResourceStore, Row,
    merge_patch, row_id,
};

#[derive(Default)]
struct Table {
    rows: BTreeMap<u64, Row>,
    next_id: u64,
}

impl Table {
    fn insert(&mut self, mut row: Row) -> Result<Row, StorageError> {
        let id = match row_id(&row)? {
            Some(id) if self.rows.contains_key(&id) => return Err(StorageError::Conflict),
            Some(id) => id,
            None => self.next_id + 1,
        };
        self.next_id = self.next_id.max(id);
        row.insert(ID_COLUMN.into(), Value::from(id));
        self.rows.insert(id, row.clone());
        Ok(row)
    }
}

/// In-memory resource store for tests, demos and offline use.
///
/// Change events are published while the table lock is held, so they reach
/// subscribers in the order the writes were applied.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<HashMap<String, Table>>>,
    hub: Arc<ChangeHub>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The change hub used by this store.
    #[must_use]
    pub fn changes(&self) -> &ChangeHub {
        &self.hub
    }

    fn with_table<T>(
        &self,
        resource: &Resource,
        f: impl FnOnce(&mut Table) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        f(guard.entry(resource.name().to_owned()).or_default())
    }

    fn emit(&self, resource: &Resource, kind: ChangeKind, rows: Vec<Row>) {
        for row in rows {
            self.hub.publish(&ChangeEvent {
                kind,
                resource: resource.clone(),
                record: Value::Object(row),
            });
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn select(&self, resource: &Resource, filter: &Filter) -> Result<Vec<Row>, StorageError> {
        self.with_table(resource, |table| {
            Ok(table
                .rows
                .values()
                .filter(|row| filter.matches(row))
                .cloned()
                .collect())
        })
    }

    async fn insert(&self, resource: &Resource, row: Row) -> Result<Row, StorageError> {
        self.with_table(resource, |table| {
            let stored = table.insert(row)?;
            self.emit(resource, ChangeKind::Created, vec![stored.clone()]);
            Ok(stored)
        })
    }

    async fn update(
        &self,
        resource: &Resource,
        filter: &Filter,
        patch: Row,
    ) -> Result<u64, StorageError> {
        self.with_table(resource, |table| {
            let mut changed = Vec::new();
            for row in table.rows.values_mut().filter(|row| filter.matches(row)) {
                merge_patch(row, &patch);
                changed.push(row.clone());
            }
            let count = changed.len() as u64;
            self.emit(resource, ChangeKind::Updated, changed);
            Ok(count)
        })
    }

    async fn upsert(
        &self,
        resource: &Resource,
        row: Row,
        conflict: &[&str],
    ) -> Result<Row, StorageError> {
        let filter = Filter::on_columns(&row, conflict);
        self.with_table(resource, |table| {
            let existing = table
                .rows
                .values_mut()
                .find(|candidate| filter.matches(candidate));
            let (kind, stored) = match existing {
                Some(current) => {
                    merge_patch(current, &row);
                    (ChangeKind::Updated, current.clone())
                }
                None => (ChangeKind::Created, table.insert(row)?),
            };
            self.emit(resource, kind, vec![stored.clone()]);
            Ok(stored)
        })
    }

    async fn delete(&self, resource: &Resource, filter: &Filter) -> Result<u64, StorageError> {
        self.with_table(resource, |table| {
            let ids: Vec<u64> = table
                .rows
                .iter()
                .filter(|(_, row)| filter.matches(row))
                .map(|(id, _)| *id)
                .collect();
            let removed: Vec<Row> = ids
                .into_iter()
                .filter_map(|id| table.rows.remove(&id))
                .collect();
            let count = removed.len() as u64;
            self.emit(resource, ChangeKind::Deleted, removed);
            Ok(count)
        })
    }

    async fn subscribe(&self, request: ChangeRequest) -> Result<ChangeReceiver, StorageError> {
        self.hub.register(request)
    }
}
