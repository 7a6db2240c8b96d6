use serde_json::Value;
use sqlx::Row as _;

use crate::repository::StorageError;
use crate::table::{ID_COLUMN, Row};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_to_i64(id: u64) -> Result<i64, StorageError> {
    i64::try_from(id).map_err(|_| StorageError::Serialization("id overflow".into()))
}

pub(crate) fn encode_body(row: &Row) -> Result<String, StorageError> {
    serde_json::to_string(row).map_err(ser)
}

/// Decodes a `resource_rows` row into its JSON body, with the id column
/// taken from the key rather than the body.
pub(crate) fn map_resource_row(row: &sqlx::sqlite::SqliteRow) -> Result<Row, StorageError> {
    let id: i64 = row.try_get("id").map_err(ser)?;
    let body: String = row.try_get("body").map_err(ser)?;
    let mut decoded: Row = match serde_json::from_str(&body).map_err(ser)? {
        Value::Object(map) => map,
        other => {
            return Err(StorageError::Serialization(format!(
                "row body is not an object: {other}"
            )));
        }
    };
    decoded.insert(ID_COLUMN.into(), Value::from(id));
    Ok(decoded)
}
