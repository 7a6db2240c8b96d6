//! Device-local key-value storage for last-known snapshots.
//!
//! Values never expire here; freshness decisions belong to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{CourseId, CourseProgress, UserId};
use serde::{Deserialize, Serialize};

use crate::repository::StorageError;

/// Key under which the last signed-in user is remembered.
pub const LAST_USER_KEY: &str = "session:last_user";

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be written.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be written.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Clone, Default)]
pub struct InMemoryLocalStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

//
// ─── PROGRESS SNAPSHOTS ───────────────────────────────────────────────────────
//

#[must_use]
pub fn progress_key(user: UserId, course: CourseId) -> String {
    format!("progress:{user}:{course}")
}

/// Serialized form of a progress value kept across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub enrolled: bool,
    pub progress: u8,
    pub last_accessed: Option<DateTime<Utc>>,
    pub stored_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn from_progress(progress: &CourseProgress, stored_at: DateTime<Utc>) -> Self {
        Self {
            enrolled: progress.enrolled(),
            progress: progress.progress(),
            last_accessed: progress.last_accessed(),
            stored_at,
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the snapshot holds an invalid value.
    pub fn into_progress(self) -> Result<CourseProgress, StorageError> {
        CourseProgress::new(self.enrolled, i64::from(self.progress), self.last_accessed)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// # Errors
///
/// Returns `StorageError` if the snapshot cannot be serialized or written.
pub async fn save_snapshot(
    store: &dyn LocalStore,
    user: UserId,
    course: CourseId,
    snapshot: &ProgressSnapshot,
) -> Result<(), StorageError> {
    let value =
        serde_json::to_string(snapshot).map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.set(&progress_key(user, course), value).await
}

/// # Errors
///
/// Returns `StorageError` if the store cannot be read or the value is not a snapshot.
pub async fn load_snapshot(
    store: &dyn LocalStore,
    user: UserId,
    course: CourseId,
) -> Result<Option<ProgressSnapshot>, StorageError> {
    store
        .get(&progress_key(user, course))
        .await?
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
}

/// # Errors
///
/// Returns `StorageError` if the value cannot be written.
pub async fn remember_user(store: &dyn LocalStore, user: UserId) -> Result<(), StorageError> {
    store.set(LAST_USER_KEY, user.to_string()).await
}

/// The last remembered user. A corrupt value reads as no user.
///
/// # Errors
///
/// Returns `StorageError` if the store cannot be read.
pub async fn last_user(store: &dyn LocalStore) -> Result<Option<UserId>, StorageError> {
    Ok(store
        .get(LAST_USER_KEY)
        .await?
        .and_then(|raw| raw.parse().ok()))
}
