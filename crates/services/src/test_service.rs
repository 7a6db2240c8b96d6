use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use course_core::model::{Certificate, CourseId, MAX_PROGRESS, UserId};
use course_core::scoring::{AnswerMap, TestOutcome, TestScope, evaluate};
use storage::repository::{AssessmentRepository, CourseRepository, TestResultRecord};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::error::TestServiceError;
use crate::progress_cache::ProgressCache;

/// A graded and persisted attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSubmission {
    pub record: TestResultRecord,
    pub outcome: TestOutcome,
    /// False when a passed course test could not mark the enrollment
    /// complete. The attempt is stored either way.
    pub progress_synced: bool,
}

/// Grades answer sheets, keeps attempt history, and derives certificates.
#[derive(Clone)]
pub struct TestService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    assessments: Arc<dyn AssessmentRepository>,
    progress: Arc<ProgressCache>,
}

impl TestService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        assessments: Arc<dyn AssessmentRepository>,
        progress: Arc<ProgressCache>,
    ) -> Self {
        Self {
            clock,
            courses,
            assessments,
            progress,
        }
    }

    /// Scores `answers` against the key for `scope` and stores the attempt.
    ///
    /// Passing the course-level test marks the course as complete. Once the
    /// attempt is stored the call succeeds; a failed completion update is
    /// logged and reported through `TestSubmission::progress_synced`.
    ///
    /// # Errors
    ///
    /// Returns `TestServiceError::NotAuthenticated` without a user,
    /// `TestServiceError::CourseNotFound` for an unknown course,
    /// `TestServiceError::MissingAnswerKey` when the test has no key, and
    /// `TestServiceError::Storage` when the attempt cannot be stored.
    pub async fn submit(
        &self,
        user: Option<UserId>,
        course_id: CourseId,
        scope: TestScope,
        answers: AnswerMap,
    ) -> Result<TestSubmission, TestServiceError> {
        let user = user.ok_or(TestServiceError::NotAuthenticated)?;
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or(TestServiceError::CourseNotFound(course_id))?;
        let key = self
            .assessments
            .answer_key(course_id, scope)
            .await?
            .ok_or(TestServiceError::MissingAnswerKey)?;

        let outcome = evaluate(&answers, &key, course.passing_score());
        let record = self
            .assessments
            .record_result(TestResultRecord {
                id: None,
                user_id: user,
                course_id,
                chapter_id: scope.chapter_id(),
                score: outcome.score,
                passed: outcome.passed,
                answers,
                taken_at: self.clock.now(),
            })
            .await?;

        info!(
            %user,
            course = %course_id,
            chapter = ?scope.chapter_id(),
            score = outcome.score,
            passed = outcome.passed,
            "test submitted"
        );

        let progress_synced = if outcome.passed && scope == TestScope::Course {
            match self
                .progress
                .record_progress(user, course_id, MAX_PROGRESS)
                .await
            {
                Ok(_) => true,
                Err(err) => {
                    warn!(
                        %user,
                        course = %course_id,
                        error = %err,
                        "could not mark course complete"
                    );
                    false
                }
            }
        } else {
            true
        };

        Ok(TestSubmission {
            record,
            outcome,
            progress_synced,
        })
    }

    /// Attempts by `user`, newest first, optionally for one course.
    ///
    /// # Errors
    ///
    /// Returns `TestServiceError::NotAuthenticated` without a user and
    /// `TestServiceError::Storage` if the history cannot be read.
    pub async fn results(
        &self,
        user: Option<UserId>,
        course: Option<CourseId>,
    ) -> Result<Vec<TestResultRecord>, TestServiceError> {
        let user = user.ok_or(TestServiceError::NotAuthenticated)?;
        Ok(self.assessments.results_for(user, course).await?)
    }

    /// One certificate per course whose final test `user` has passed,
    /// ordered by course ID.
    ///
    /// # Errors
    ///
    /// Returns `TestServiceError::NotAuthenticated` without a user and
    /// `TestServiceError::Storage` if results or courses cannot be read.
    pub async fn certificates(
        &self,
        user: Option<UserId>,
    ) -> Result<Vec<Certificate>, TestServiceError> {
        let user = user.ok_or(TestServiceError::NotAuthenticated)?;
        let results = self.assessments.results_for(user, None).await?;

        let mut best: BTreeMap<CourseId, (u8, DateTime<Utc>)> = BTreeMap::new();
        for result in results
            .iter()
            .filter(|r| r.passed && r.scope() == TestScope::Course)
        {
            best.entry(result.course_id)
                .and_modify(|(score, issued_at)| {
                    *score = (*score).max(result.score);
                    *issued_at = (*issued_at).min(result.taken_at);
                })
                .or_insert((result.score, result.taken_at));
        }

        let mut certificates = Vec::with_capacity(best.len());
        for (course_id, (score, issued_at)) in best {
            let Some(course) = self.courses.get_course(course_id).await? else {
                debug!(course = %course_id, "skipping certificate for removed course");
                continue;
            };
            certificates.push(Certificate {
                user_id: user,
                course_id,
                course_title: course.title().to_owned(),
                score,
                issued_at,
            });
        }
        Ok(certificates)
    }
}
