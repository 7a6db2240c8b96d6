use async_trait::async_trait;
use chrono::Utc;
use course_core::model::{ChangeKind, Resource};
use serde_json::Value;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::debug;

use super::SqliteRepository;
use super::mapping::{conn, encode_body, id_to_i64, map_resource_row};
use crate::repository::StorageError;
use crate::table::{
    ChangeEvent, ChangeReceiver, ChangeRequest, Filter, ID_COLUMN, ResourceStore, Row,
    merge_patch, row_id,
};

async fn select_in(
    db: &mut SqliteConnection,
    resource: &Resource,
    filter: &Filter,
) -> Result<Vec<Row>, StorageError> {
    let rows = sqlx::query(
        r"
            SELECT id, body
            FROM resource_rows
            WHERE resource = ?1
            ORDER BY id ASC
        ",
    )
    .bind(resource.name())
    .fetch_all(&mut *db)
    .await
    .map_err(conn)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let decoded = map_resource_row(&row)?;
        if filter.matches(&decoded) {
            out.push(decoded);
        }
    }
    Ok(out)
}

async fn insert_in(
    db: &mut SqliteConnection,
    resource: &Resource,
    mut row: Row,
) -> Result<Row, StorageError> {
    let id = match row_id(&row)? {
        Some(id) => id_to_i64(id)?,
        None => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM resource_rows WHERE resource = ?1",
            )
            .bind(resource.name())
            .fetch_one(&mut *db)
            .await
            .map_err(conn)?
        }
    };
    row.insert(ID_COLUMN.into(), Value::from(id));

    sqlx::query(
        r"
            INSERT INTO resource_rows (resource, id, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
        ",
    )
    .bind(resource.name())
    .bind(id)
    .bind(encode_body(&row)?)
    .bind(Utc::now())
    .execute(&mut *db)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StorageError::Conflict,
        _ => conn(err),
    })?;

    Ok(row)
}

async fn rewrite_in(
    db: &mut SqliteConnection,
    resource: &Resource,
    row: &Row,
) -> Result<(), StorageError> {
    let id = row_id(row)?.ok_or(StorageError::NotFound)?;
    sqlx::query(
        r"
            UPDATE resource_rows
            SET body = ?3, updated_at = ?4
            WHERE resource = ?1 AND id = ?2
        ",
    )
    .bind(resource.name())
    .bind(id_to_i64(id)?)
    .bind(encode_body(row)?)
    .bind(Utc::now())
    .execute(&mut *db)
    .await
    .map_err(conn)?;
    Ok(())
}

impl SqliteRepository {
    /// Takes the write lock up front so a read-then-write inside the
    /// transaction cannot interleave with another writer.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(conn)
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
impl ResourceStore for SqliteRepository {
    async fn select(&self, resource: &Resource, filter: &Filter) -> Result<Vec<Row>, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        select_in(&mut db, resource, filter).await
    }

    async fn insert(&self, resource: &Resource, row: Row) -> Result<Row, StorageError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        let stored = insert_in(&mut tx, resource, row).await?;
        tx.commit().await.map_err(conn)?;

        self.emit(resource, ChangeKind::Created, vec![stored.clone()]);
        Ok(stored)
    }

    async fn update(
        &self,
        resource: &Resource,
        filter: &Filter,
        patch: Row,
    ) -> Result<u64, StorageError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        let mut changed = select_in(&mut tx, resource, filter).await?;
        for row in &mut changed {
            merge_patch(row, &patch);
            rewrite_in(&mut tx, resource, row).await?;
        }
        tx.commit().await.map_err(conn)?;

        let count = changed.len() as u64;
        debug!(resource = %resource, count, "rows updated");
        self.emit(resource, ChangeKind::Updated, changed);
        Ok(count)
    }

    async fn upsert(
        &self,
        resource: &Resource,
        row: Row,
        conflict: &[&str],
    ) -> Result<Row, StorageError> {
        let filter = Filter::on_columns(&row, conflict);
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        let existing = select_in(&mut tx, resource, &filter).await?.into_iter().next();
        let (kind, stored) = match existing {
            Some(mut current) => {
                merge_patch(&mut current, &row);
                rewrite_in(&mut tx, resource, &current).await?;
                (ChangeKind::Updated, current)
            }
            None => (ChangeKind::Created, insert_in(&mut tx, resource, row).await?),
        };
        tx.commit().await.map_err(conn)?;

        self.emit(resource, kind, vec![stored.clone()]);
        Ok(stored)
    }

    async fn delete(&self, resource: &Resource, filter: &Filter) -> Result<u64, StorageError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        let removed = select_in(&mut tx, resource, filter).await?;
        for row in &removed {
            let id = row_id(row)?.ok_or(StorageError::NotFound)?;
            sqlx::query("DELETE FROM resource_rows WHERE resource = ?1 AND id = ?2")
                .bind(resource.name())
                .bind(id_to_i64(id)?)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }
        tx.commit().await.map_err(conn)?;

        let count = removed.len() as u64;
        self.emit(resource, ChangeKind::Deleted, removed);
        Ok(count)
    }

    async fn subscribe(&self, request: ChangeRequest) -> Result<ChangeReceiver, StorageError> {
        self.hub.register(request)
    }
}
