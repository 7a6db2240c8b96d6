use anyhow::{Context, Result};
use course_core::model::{ChapterId, Course, CourseId};
use course_core::scoring::{AnswerKey, AnswerValue, TestScope};
use storage::repository::Storage;
use tracing::info;

struct DemoCourse {
    id: u64,
    title: &'static str,
    description: &'static str,
    passing_score: u8,
    final_key: &'static [i64],
    chapter_keys: &'static [&'static [i64]],
}

const DEMO_COURSES: &[DemoCourse] = &[
    DemoCourse {
        id: 1,
        title: "Rust Fundamentals",
        description: "Ownership, borrowing and the type system.",
        passing_score: 70,
        final_key: &[1, 0, 2, 3, 1],
        chapter_keys: &[&[0, 2], &[1, 1, 3]],
    },
    DemoCourse {
        id: 2,
        title: "Async Rust",
        description: "Futures, executors and cancellation.",
        passing_score: 80,
        final_key: &[2, 2, 0, 1],
        chapter_keys: &[&[3, 0]],
    },
    DemoCourse {
        id: 3,
        title: "SQL Basics",
        description: "Selecting, joining and indexing.",
        passing_score: 60,
        final_key: &[0, 1, 2],
        chapter_keys: &[],
    },
];

fn answer_key(values: &[i64]) -> AnswerKey {
    (0_u32..)
        .zip(values)
        .map(|(question, value)| (question, AnswerValue::Index(*value)))
        .collect()
}

/// Writes the demo catalog and answer keys. Safe to run repeatedly.
pub async fn seed_demo_data(storage: &Storage) -> Result<()> {
    for demo in DEMO_COURSES {
        let chapters = u32::try_from(demo.chapter_keys.len()).unwrap_or(u32::MAX);
        let course = Course::new(
            CourseId::new(demo.id),
            demo.title,
            Some(demo.description.to_owned()),
            demo.passing_score,
            chapters,
        )
        .with_context(|| format!("building course {}", demo.id))?;
        storage
            .courses
            .upsert_course(&course)
            .await
            .with_context(|| format!("saving course {}", demo.id))?;

        storage
            .assessments
            .save_answer_key(course.id(), TestScope::Course, &answer_key(demo.final_key))
            .await
            .context("saving final test key")?;
        for (chapter, key) in (1_u64..).zip(demo.chapter_keys) {
            storage
                .assessments
                .save_answer_key(
                    course.id(),
                    TestScope::Chapter(ChapterId::new(chapter)),
                    &answer_key(key),
                )
                .await
                .context("saving chapter test key")?;
        }
        info!(course = %course.id(), title = course.title(), "seeded course");
    }
    Ok(())
}
