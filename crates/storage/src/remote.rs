use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{Course, CourseId, CourseProgress, Resource, UserId};
use course_core::scoring::{AnswerKey, TestScope};
use serde_json::{Value, json};

use crate::ids::RawId;
use crate::records::{
    AnswerKeyRow, CourseRow, EnrollmentRow, TestResultRow, from_row, to_row,
};
use crate::repository::{
    AssessmentRepository, CourseRepository, EnrollmentRepository, StorageError, TestResultRecord,
};
use crate::table::{Filter, ResourceStore, Row, row_id};

/// Typed repositories implemented over any [`ResourceStore`].
#[derive(Clone)]
pub struct TableRepository {
    store: Arc<dyn ResourceStore>,
}

impl TableRepository {
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    fn enrollment_filter(user: UserId, course: CourseId) -> Filter {
        Filter::new()
            .eq(Resource::OWNER_COLUMN, user.to_string())
            .eq("course_id", RawId::from(course).to_json())
    }

    fn answer_key_filter(course: CourseId, scope: TestScope) -> Filter {
        let chapter = scope
            .chapter_id()
            .map_or(Value::Null, |id| RawId::from(id).to_json());
        Filter::new()
            .eq("course_id", RawId::from(course).to_json())
            .eq("chapter_id", chapter)
    }
}

#[async_trait]
impl CourseRepository for TableRepository {
    async fn list_courses(&self) -> Result<Vec<Course>, StorageError> {
        let rows = self
            .store
            .select(&Resource::courses(), &Filter::new())
            .await?;
        let mut courses = rows
            .into_iter()
            .map(|row| from_row::<CourseRow>(row)?.into_course())
            .collect::<Result<Vec<_>, _>>()?;
        courses.sort_by_key(Course::id);
        Ok(courses)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let filter = Filter::new().eq("id", RawId::from(id).to_json());
        let rows = self.store.select(&Resource::courses(), &filter).await?;
        rows.into_iter()
            .next()
            .map(|row| from_row::<CourseRow>(row)?.into_course())
            .transpose()
    }

    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        let row = to_row(&CourseRow::from_course(course))?;
        self.store
            .upsert(&Resource::courses(), row, &["id"])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EnrollmentRepository for TableRepository {
    async fn fetch_progress(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        let rows = self
            .store
            .select(
                &Resource::enrollments(),
                &Self::enrollment_filter(user, course),
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| from_row::<EnrollmentRow>(row)?.into_progress())
            .transpose()
    }

    async fn enroll(
        &self,
        user: UserId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let row = to_row(&EnrollmentRow::touch(user, course, at))?;
        self.store
            .upsert(
                &Resource::enrollments(),
                row,
                &[Resource::OWNER_COLUMN, "course_id"],
            )
            .await?;
        Ok(())
    }

    async fn set_progress(
        &self,
        user: UserId,
        course: CourseId,
        progress: u8,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut patch = Row::new();
        patch.insert("progress".into(), json!(progress));
        patch.insert("last_accessed".into(), json!(at));
        let updated = self
            .store
            .update(
                &Resource::enrollments(),
                &Self::enrollment_filter(user, course),
                patch,
            )
            .await?;
        if updated == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl AssessmentRepository for TableRepository {
    async fn answer_key(
        &self,
        course: CourseId,
        scope: TestScope,
    ) -> Result<Option<AnswerKey>, StorageError> {
        let rows = self
            .store
            .select(
                &Resource::answer_keys(),
                &Self::answer_key_filter(course, scope),
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| from_row::<AnswerKeyRow>(row).map(|r| r.answers))
            .transpose()
    }

    async fn save_answer_key(
        &self,
        course: CourseId,
        scope: TestScope,
        key: &AnswerKey,
    ) -> Result<(), StorageError> {
        let row = to_row(&AnswerKeyRow::new(course, scope, key.clone()))?;
        self.store
            .upsert(&Resource::answer_keys(), row, &["course_id", "chapter_id"])
            .await?;
        Ok(())
    }

    async fn record_result(
        &self,
        record: TestResultRecord,
    ) -> Result<TestResultRecord, StorageError> {
        let row = to_row(&TestResultRow::from_record(&record))?;
        let stored = self.store.insert(&Resource::test_results(), row).await?;
        Ok(TestResultRecord {
            id: row_id(&stored)?,
            ..record
        })
    }

    async fn results_for(
        &self,
        user: UserId,
        course: Option<CourseId>,
    ) -> Result<Vec<TestResultRecord>, StorageError> {
        let mut filter = Filter::new().eq(Resource::OWNER_COLUMN, user.to_string());
        if let Some(course) = course {
            filter = filter.eq("course_id", RawId::from(course).to_json());
        }
        let rows = self
            .store
            .select(&Resource::test_results(), &filter)
            .await?;
        let mut results = rows
            .into_iter()
            .map(|row| from_row::<TestResultRow>(row)?.into_record())
            .collect::<Result<Vec<_>, _>>()?;
        results.sort_by(|a, b| b.taken_at.cmp(&a.taken_at).then(b.id.cmp(&a.id)));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use course_core::model::ChapterId;
    use course_core::scoring::{AnswerMap, AnswerValue};
    use course_core::time::fixed_now;

    fn repo() -> (Arc<InMemoryStore>, TableRepository) {
        let store = Arc::new(InMemoryStore::new());
        let repo = TableRepository::new(Arc::clone(&store) as Arc<dyn ResourceStore>);
        (store, repo)
    }

    #[tokio::test]
    async fn enroll_then_fetch() {
        let (_, repo) = repo();
        let user = UserId::random();
        let course = CourseId::new(1);

        assert_eq!(repo.fetch_progress(user, course).await.unwrap(), None);
        repo.enroll(user, course, fixed_now()).await.unwrap();
        repo.enroll(user, course, fixed_now()).await.unwrap();

        let progress = repo.fetch_progress(user, course).await.unwrap().unwrap();
        assert!(progress.enrolled());
        assert_eq!(progress.progress(), 0);

        repo.set_progress(user, course, 40, fixed_now()).await.unwrap();
        let progress = repo.fetch_progress(user, course).await.unwrap().unwrap();
        assert_eq!(progress.progress(), 40);
    }

    #[tokio::test]
    async fn enrollment_lookup_tolerates_string_course_ids() {
        let (store, repo) = repo();
        let user = UserId::random();
        let row = json!({"user_id": user.to_string(), "course_id": "8", "progress": 25})
            .as_object()
            .cloned()
            .unwrap();
        store.insert(&Resource::enrollments(), row).await.unwrap();

        let progress = repo
            .fetch_progress(user, CourseId::new(8))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.progress(), 25);
    }

    #[tokio::test]
    async fn set_progress_requires_enrollment() {
        let (_, repo) = repo();
        let err = repo
            .set_progress(UserId::random(), CourseId::new(1), 10, fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn answer_keys_are_scoped() {
        let (_, repo) = repo();
        let course = CourseId::new(2);
        let chapter_key: AnswerKey = [(0, AnswerValue::Index(1))].into_iter().collect();
        let final_key: AnswerKey = [(0, AnswerValue::Index(3))].into_iter().collect();

        repo.save_answer_key(course, TestScope::Chapter(ChapterId::new(1)), &chapter_key)
            .await
            .unwrap();
        repo.save_answer_key(course, TestScope::Course, &final_key)
            .await
            .unwrap();
        repo.save_answer_key(course, TestScope::Course, &final_key)
            .await
            .unwrap();

        assert_eq!(
            repo.answer_key(course, TestScope::Course).await.unwrap(),
            Some(final_key)
        );
        assert_eq!(
            repo.answer_key(course, TestScope::Chapter(ChapterId::new(1)))
                .await
                .unwrap(),
            Some(chapter_key)
        );
        assert_eq!(
            repo.answer_key(course, TestScope::Chapter(ChapterId::new(9)))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn results_are_listed_newest_first() {
        let (_, repo) = repo();
        let user = UserId::random();
        for (minutes, score) in [(0, 40), (10, 80)] {
            let record = TestResultRecord {
                id: None,
                user_id: user,
                course_id: CourseId::new(1),
                chapter_id: None,
                score,
                passed: score >= 70,
                answers: AnswerMap::new(),
                taken_at: fixed_now() + chrono::Duration::minutes(minutes),
            };
            let stored = repo.record_result(record).await.unwrap();
            assert!(stored.id.is_some());
        }

        let results = repo.results_for(user, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, 80);
        assert!(repo.results_for(UserId::random(), None).await.unwrap().is_empty());
    }
}
