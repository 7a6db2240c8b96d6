use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{ChapterId, Course, CourseId, CourseProgress, UserId};
use course_core::scoring::{AnswerKey, AnswerMap, TestScope};
use thiserror::Error;

use crate::local::{InMemoryLocalStore, LocalStore};
use crate::memory::InMemoryStore;
use crate::remote::TableRepository;
use crate::table::ResourceStore;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

/// Persisted shape of a graded test attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResultRecord {
    pub id: Option<u64>,
    pub user_id: UserId,
    pub course_id: CourseId,
    /// `None` for the course-level test.
    pub chapter_id: Option<ChapterId>,
    pub score: u8,
    pub passed: bool,
    pub answers: AnswerMap,
    pub taken_at: DateTime<Utc>,
}

impl TestResultRecord {
    #[must_use]
    pub fn scope(&self) -> TestScope {
        self.chapter_id.map_or(TestScope::Course, TestScope::Chapter)
    }
}

/// Course catalog access.
#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// All courses ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn list_courses(&self) -> Result<Vec<Course>, StorageError>;

    /// Fetch a course by ID. Returns `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;

    /// Persist or update a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError>;
}

/// Enrollment and completion state per user and course.
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Returns `Ok(None)` when the user is not enrolled.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached or the row is malformed.
    async fn fetch_progress(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError>;

    /// Marks the user as enrolled. Enrolling twice keeps a single row and
    /// resets nothing but the access time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn enroll(
        &self,
        user: UserId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Records a new completion percentage for an existing enrollment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user is not enrolled.
    async fn set_progress(
        &self,
        user: UserId,
        course: CourseId,
        progress: u8,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

/// Answer keys and graded attempts.
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    async fn answer_key(
        &self,
        course: CourseId,
        scope: TestScope,
    ) -> Result<Option<AnswerKey>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn save_answer_key(
        &self,
        course: CourseId,
        scope: TestScope,
        key: &AnswerKey,
    ) -> Result<(), StorageError>;

    /// Persists an attempt and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn record_result(
        &self,
        record: TestResultRecord,
    ) -> Result<TestResultRecord, StorageError>;

    /// Attempts by `user`, optionally limited to one course, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    async fn results_for(
        &self,
        user: UserId,
        course: Option<CourseId>,
    ) -> Result<Vec<TestResultRecord>, StorageError>;
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub store: Arc<dyn ResourceStore>,
    pub courses: Arc<dyn CourseRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub assessments: Arc<dyn AssessmentRepository>,
    pub local: Arc<dyn LocalStore>,
}

impl Storage {
    /// Wires table-backed repositories over any resource store.
    #[must_use]
    pub fn from_store(store: Arc<dyn ResourceStore>, local: Arc<dyn LocalStore>) -> Self {
        let repo = TableRepository::new(Arc::clone(&store));
        Self {
            store,
            courses: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            assessments: Arc::new(repo),
            local,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_store(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryLocalStore::new()),
        )
    }
}
