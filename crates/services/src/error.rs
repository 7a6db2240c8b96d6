//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::{CourseId, ProgressError as InvalidProgress, Resource};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressCache`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("no signed-in user")]
    NotAuthenticated,
    #[error("course {0} not found")]
    NotFound(CourseId),
    #[error("progress request failed: {0}")]
    Transport(#[source] StorageError),
    #[error("invalid progress: {0}")]
    Invalid(#[source] InvalidProgress),
}

/// Errors emitted by `RealtimeListener`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RealtimeError {
    #[error("could not subscribe to {resource}: {reason}")]
    Subscription { resource: Resource, reason: String },
}

/// Errors emitted by `TestService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestServiceError {
    #[error("no signed-in user")]
    NotAuthenticated,
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("no answer key for this test")]
    MissingAnswerKey,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `CatalogService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
