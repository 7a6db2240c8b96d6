use thiserror::Error;

use crate::model::ids::CourseId;

/// Passing score applied when a course does not define its own.
pub const DEFAULT_PASSING_SCORE: u8 = 70;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("passing score must be between 1 and 100, got {0}")]
    InvalidPassingScore(u8),
}

/// A course in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    id: CourseId,
    title: String,
    description: Option<String>,
    passing_score: u8,
    chapter_count: u32,
}

impl Course {
    /// Creates a validated course.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyTitle` for a blank title and
    /// `CourseError::InvalidPassingScore` when the score is 0 or above 100.
    pub fn new(
        id: CourseId,
        title: impl Into<String>,
        description: Option<String>,
        passing_score: u8,
        chapter_count: u32,
    ) -> Result<Self, CourseError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(CourseError::EmptyTitle);
        }
        if passing_score == 0 || passing_score > 100 {
            return Err(CourseError::InvalidPassingScore(passing_score));
        }
        let description = description
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());

        Ok(Self {
            id,
            title,
            description,
            passing_score,
            chapter_count,
        })
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn passing_score(&self) -> u8 {
        self.passing_score
    }

    #[must_use]
    pub fn chapter_count(&self) -> u32 {
        self.chapter_count
    }
}
