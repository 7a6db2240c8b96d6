use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{ChapterId, Course, CourseId, CourseProgress, UserId};
use course_core::scoring::{AnswerKey, AnswerMap, AnswerValue, FeedbackTier, TestScope};
use course_core::time::fixed_now;
use services::{
    AppServices, Clock, FetchOptions, ProgressCache, RetryPolicy, SyncConfig, TestService,
    TestServiceError,
};
use storage::StorageError;
use storage::repository::{EnrollmentRepository, Storage};

const RUST_101: CourseId = CourseId::new(1);
const GO_201: CourseId = CourseId::new(2);

fn key(values: &[i64]) -> AnswerKey {
    values
        .iter()
        .enumerate()
        .map(|(q, v)| (u32::try_from(q).unwrap(), AnswerValue::Index(*v)))
        .collect()
}

fn sheet(values: &[i64]) -> AnswerMap {
    key(values)
}

/// Enrollment store that is never reachable.
struct UnreachableEnrollments;

#[async_trait]
impl EnrollmentRepository for UnreachableEnrollments {
    async fn fetch_progress(
        &self,
        _user: UserId,
        _course: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        Err(StorageError::Connection("down".into()))
    }

    async fn enroll(
        &self,
        _user: UserId,
        _course: CourseId,
        _at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Err(StorageError::Connection("down".into()))
    }

    async fn set_progress(
        &self,
        _user: UserId,
        _course: CourseId,
        _progress: u8,
        _at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Err(StorageError::Connection("down".into()))
    }
}

async fn seeded_storage() -> Storage {
    let storage = Storage::in_memory();
    for course in [
        Course::new(RUST_101, "Rust 101", None, 70, 2).unwrap(),
        Course::new(GO_201, "Go 201", Some("Concurrency".into()), 80, 3).unwrap(),
    ] {
        storage.courses.upsert_course(&course).await.unwrap();
    }
    storage
        .assessments
        .save_answer_key(RUST_101, TestScope::Course, &key(&[1, 2, 3, 0]))
        .await
        .unwrap();
    storage
        .assessments
        .save_answer_key(
            RUST_101,
            TestScope::Chapter(ChapterId::new(1)),
            &key(&[0, 0]),
        )
        .await
        .unwrap();
    storage
}

async fn seeded(clock: Clock) -> AppServices {
    AppServices::from_storage(seeded_storage().await, &SyncConfig::default(), clock)
}

#[tokio::test]
async fn passing_the_course_test_completes_the_course() {
    let services = seeded(Clock::fixed(fixed_now())).await;
    let user = UserId::random();

    let submission = services
        .tests()
        .submit(Some(user), RUST_101, TestScope::Course, sheet(&[1, 2, 3, 0]))
        .await
        .unwrap();

    assert_eq!(submission.outcome.score, 100);
    assert!(submission.outcome.passed);
    assert_eq!(submission.outcome.feedback.tier, FeedbackTier::Excellent);
    assert!(submission.record.id.is_some());
    assert!(submission.progress_synced);

    let progress = services
        .progress()
        .get_progress(Some(user), RUST_101, FetchOptions::forced())
        .await
        .unwrap();
    assert!(progress.is_complete());
}

#[tokio::test]
async fn failing_a_chapter_test_is_recorded_without_progress() {
    let services = seeded(Clock::fixed(fixed_now())).await;
    let user = UserId::random();

    let submission = services
        .tests()
        .submit(
            Some(user),
            RUST_101,
            TestScope::Chapter(ChapterId::new(1)),
            sheet(&[0, 1]),
        )
        .await
        .unwrap();

    assert_eq!(submission.outcome.score, 50);
    assert!(!submission.outcome.passed);
    assert_eq!(submission.outcome.feedback.tier, FeedbackTier::Failed);
    assert_eq!(submission.record.chapter_id, Some(ChapterId::new(1)));

    let progress = services
        .progress()
        .get_progress(Some(user), RUST_101, FetchOptions::default())
        .await
        .unwrap();
    assert!(!progress.enrolled());
}

#[tokio::test]
async fn stored_attempt_survives_a_failed_completion_update() {
    let storage = seeded_storage().await;
    let clock = Clock::fixed(fixed_now());
    let progress = Arc::new(
        ProgressCache::new(
            clock.clone(),
            Arc::clone(&storage.courses),
            Arc::new(UnreachableEnrollments),
        )
        .with_retry(RetryPolicy::none()),
    );
    let tests = TestService::new(
        clock,
        Arc::clone(&storage.courses),
        Arc::clone(&storage.assessments),
        Arc::clone(&progress),
    );
    let user = Some(UserId::random());

    let submission = tests
        .submit(user, RUST_101, TestScope::Course, sheet(&[1, 2, 3, 0]))
        .await
        .unwrap();

    assert!(submission.outcome.passed);
    assert!(!submission.progress_synced);
    assert_eq!(tests.results(user, Some(RUST_101)).await.unwrap().len(), 1);
    assert!(progress.is_empty());
}

#[tokio::test]
async fn submit_reports_missing_prerequisites() {
    let services = seeded(Clock::fixed(fixed_now())).await;
    let tests = services.tests();
    let user = Some(UserId::random());

    assert!(matches!(
        tests
            .submit(None, RUST_101, TestScope::Course, sheet(&[1]))
            .await,
        Err(TestServiceError::NotAuthenticated)
    ));
    assert!(matches!(
        tests
            .submit(user, CourseId::new(9), TestScope::Course, sheet(&[1]))
            .await,
        Err(TestServiceError::CourseNotFound(_))
    ));
    assert!(matches!(
        tests
            .submit(user, GO_201, TestScope::Course, sheet(&[1]))
            .await,
        Err(TestServiceError::MissingAnswerKey)
    ));
}

#[tokio::test]
async fn certificates_keep_best_score_and_first_pass() {
    let mut clock = Clock::manual(fixed_now());
    let services = seeded(clock.clone()).await;
    let tests = services.tests();
    let user = Some(UserId::random());

    tests
        .submit(user, RUST_101, TestScope::Course, sheet(&[1, 2, 0, 0]))
        .await
        .unwrap();
    clock.advance(chrono::Duration::hours(1));
    let first_pass = clock.now();
    tests
        .submit(user, RUST_101, TestScope::Course, sheet(&[1, 2, 3, 1]))
        .await
        .unwrap();
    clock.advance(chrono::Duration::hours(1));
    tests
        .submit(user, RUST_101, TestScope::Course, sheet(&[1, 2, 3, 0]))
        .await
        .unwrap();

    let certificates = tests.certificates(user).await.unwrap();
    assert_eq!(certificates.len(), 1);
    let cert = &certificates[0];
    assert_eq!(cert.course_id, RUST_101);
    assert_eq!(cert.course_title, "Rust 101");
    assert_eq!(cert.score, 100);
    assert_eq!(cert.issued_at, first_pass);

    let history = tests.results(user, Some(RUST_101)).await.unwrap();
    let scores: Vec<u8> = history.iter().map(|r| r.score).collect();
    assert_eq!(scores, vec![100, 75, 50]);
}

#[tokio::test]
async fn my_courses_lists_only_enrollments() {
    let services = seeded(Clock::fixed(fixed_now())).await;
    let user = UserId::random();

    assert!(services
        .progress()
        .enroll(Some(user), Some(GO_201))
        .await
        .unwrap());

    let mine = services.catalog().my_courses(Some(user)).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].course.id(), GO_201);
    assert_eq!(mine[0].progress.progress(), 0);

    assert_eq!(services.catalog().list_courses().await.unwrap().len(), 2);
}

#[tokio::test]
async fn session_user_is_remembered() {
    let services = seeded(Clock::fixed(fixed_now())).await;
    assert_eq!(services.session_user(None).await.unwrap(), None);

    let user = UserId::random();
    assert_eq!(services.session_user(Some(user)).await.unwrap(), Some(user));
    assert_eq!(services.session_user(None).await.unwrap(), Some(user));
}
