//! Wire shapes of rows in each resource and their mapping to domain types.

use chrono::{DateTime, Utc};
use course_core::model::{Course, CourseId, CourseProgress, DEFAULT_PASSING_SCORE, UserId};
use course_core::scoring::{AnswerKey, AnswerMap, TestScope};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ids::{self, RawId};
use crate::repository::{StorageError, TestResultRecord};
use crate::table::Row;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StorageError> {
    serde_json::from_value(Value::Object(row)).map_err(ser)
}

pub(crate) fn to_row<T: Serialize>(value: &T) -> Result<Row, StorageError> {
    match serde_json::to_value(value).map_err(ser)? {
        Value::Object(row) => Ok(row),
        other => Err(StorageError::Serialization(format!(
            "expected an object, got {other}"
        ))),
    }
}

//
// ─── COURSES ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CourseRow {
    pub id: RawId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub passing_score: Option<u8>,
    #[serde(default)]
    pub chapter_count: Option<u32>,
}

impl CourseRow {
    pub fn from_course(course: &Course) -> Self {
        Self {
            id: RawId::from(course.id()),
            title: course.title().to_owned(),
            description: course.description().map(str::to_owned),
            passing_score: Some(course.passing_score()),
            chapter_count: Some(course.chapter_count()),
        }
    }

    pub fn into_course(self) -> Result<Course, StorageError> {
        Course::new(
            ids::course_id(&self.id)?,
            self.title,
            self.description,
            self.passing_score.unwrap_or(DEFAULT_PASSING_SCORE),
            self.chapter_count.unwrap_or(0),
        )
        .map_err(ser)
    }
}

//
// ─── ENROLLMENTS ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EnrollmentRow {
    pub user_id: String,
    pub course_id: RawId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl EnrollmentRow {
    /// Upsert body for an enroll: carries no `progress`, so an existing
    /// row keeps its completion and a new one reads as 0.
    pub fn touch(user: UserId, course: CourseId, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user.to_string(),
            course_id: RawId::from(course),
            progress: None,
            last_accessed: Some(at),
        }
    }

    pub fn into_progress(self) -> Result<CourseProgress, StorageError> {
        CourseProgress::new(true, self.progress.unwrap_or(0), self.last_accessed).map_err(ser)
    }
}

//
// ─── ANSWER KEYS ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AnswerKeyRow {
    pub course_id: RawId,
    #[serde(default)]
    pub chapter_id: Option<RawId>,
    pub answers: AnswerKey,
}

impl AnswerKeyRow {
    pub fn new(course: CourseId, scope: TestScope, answers: AnswerKey) -> Self {
        Self {
            course_id: RawId::from(course),
            chapter_id: scope.chapter_id().map(RawId::from),
            answers,
        }
    }
}

//
// ─── TEST RESULTS ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TestResultRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RawId>,
    pub user_id: String,
    pub course_id: RawId,
    #[serde(default)]
    pub chapter_id: Option<RawId>,
    pub score: u8,
    pub passed: bool,
    #[serde(default)]
    pub answers: AnswerMap,
    pub taken_at: DateTime<Utc>,
}

impl TestResultRow {
    pub fn from_record(record: &TestResultRecord) -> Self {
        Self {
            id: record.id.map(RawId::from_u64),
            user_id: record.user_id.to_string(),
            course_id: RawId::from(record.course_id),
            chapter_id: record.chapter_id.map(RawId::from),
            score: record.score,
            passed: record.passed,
            answers: record.answers.clone(),
            taken_at: record.taken_at,
        }
    }

    pub fn into_record(self) -> Result<TestResultRecord, StorageError> {
        let id = match self.id {
            Some(raw) => match ids::to_number(raw) {
                RawId::Number(n) => Some(u64::try_from(n).map_err(ser)?),
                RawId::Text(t) => {
                    return Err(StorageError::Serialization(format!("invalid result id: {t}")));
                }
            },
            None => None,
        };
        Ok(TestResultRecord {
            id,
            user_id: ids::user_id(&self.user_id)?,
            course_id: ids::course_id(&self.course_id)?,
            chapter_id: self.chapter_id.as_ref().map(ids::chapter_id).transpose()?,
            score: self.score,
            passed: self.passed,
            answers: self.answers,
            taken_at: self.taken_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::scoring::AnswerValue;
    use course_core::time::fixed_now;
    use serde_json::json;

    #[test]
    fn course_row_accepts_string_ids_and_defaults() {
        let row = json!({"id": "4", "title": "Algebra"}).as_object().cloned().unwrap();
        let course = from_row::<CourseRow>(row).unwrap().into_course().unwrap();
        assert_eq!(course.id(), CourseId::new(4));
        assert_eq!(course.passing_score(), DEFAULT_PASSING_SCORE);
        assert_eq!(course.chapter_count(), 0);
    }

    #[test]
    fn enrollment_row_maps_to_progress() {
        let user = UserId::random();
        let row = to_row(&EnrollmentRow::touch(user, CourseId::new(2), fixed_now())).unwrap();
        assert_eq!(row["course_id"], json!(2));
        assert!(!row.contains_key("progress"));
        let progress = from_row::<EnrollmentRow>(row)
            .unwrap()
            .into_progress()
            .unwrap();
        assert!(progress.enrolled());
        assert_eq!(progress.progress(), 0);
        assert_eq!(progress.last_accessed(), Some(fixed_now()));
    }

    #[test]
    fn enrollment_row_rejects_bad_progress() {
        let row = json!({"user_id": "x", "course_id": 1, "progress": 250})
            .as_object()
            .cloned()
            .unwrap();
        let err = from_row::<EnrollmentRow>(row)
            .unwrap()
            .into_progress()
            .unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn test_result_row_keeps_answers() {
        let mut answers = AnswerMap::new();
        answers.insert(0, AnswerValue::Index(2));
        answers.insert(1, AnswerValue::Text("b".into()));
        let record = TestResultRecord {
            id: None,
            user_id: UserId::random(),
            course_id: CourseId::new(3),
            chapter_id: None,
            score: 50,
            passed: false,
            answers,
            taken_at: fixed_now(),
        };
        let mut row = to_row(&TestResultRow::from_record(&record)).unwrap();
        assert!(!row.contains_key("id"));
        row.insert("id".into(), json!("17"));
        let back = from_row::<TestResultRow>(row).unwrap().into_record().unwrap();
        assert_eq!(back.id, Some(17));
        assert_eq!(back.answers, record.answers);
        assert_eq!(back.scope(), TestScope::Course);
    }
}
