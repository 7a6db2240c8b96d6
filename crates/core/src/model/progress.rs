use chrono::{DateTime, Utc};
use thiserror::Error;

/// Upper bound for a completion percentage.
pub const MAX_PROGRESS: u8 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("progress must be between 0 and 100, got {0}")]
    OutOfRange(i64),

    #[error("a course that is not enrolled cannot report progress ({0})")]
    NotEnrolled(u8),
}

/// Enrollment state of one user in one course.
///
/// `progress` is a completion percentage in `0..=100`; `last_accessed` is
/// `None` until the user opens a lesson (or enrolls).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseProgress {
    enrolled: bool,
    progress: u8,
    last_accessed: Option<DateTime<Utc>>,
}

impl CourseProgress {
    /// Build a progress value from raw parts.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::OutOfRange` if `progress` is outside `0..=100`,
    /// and `ProgressError::NotEnrolled` if a non-enrolled course reports progress.
    pub fn new(
        enrolled: bool,
        progress: i64,
        last_accessed: Option<DateTime<Utc>>,
    ) -> Result<Self, ProgressError> {
        let progress = u8::try_from(progress)
            .ok()
            .filter(|p| *p <= MAX_PROGRESS)
            .ok_or(ProgressError::OutOfRange(progress))?;
        if !enrolled && progress > 0 {
            return Err(ProgressError::NotEnrolled(progress));
        }
        Ok(Self {
            enrolled,
            progress,
            last_accessed,
        })
    }

    /// The state reported for a course the user never enrolled in.
    #[must_use]
    pub fn not_enrolled() -> Self {
        Self {
            enrolled: false,
            progress: 0,
            last_accessed: None,
        }
    }

    /// The state written immediately after a successful enrollment.
    #[must_use]
    pub fn just_enrolled(at: DateTime<Utc>) -> Self {
        Self {
            enrolled: true,
            progress: 0,
            last_accessed: Some(at),
        }
    }

    #[must_use]
    pub fn enrolled(&self) -> bool {
        self.enrolled
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        self.last_accessed
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.enrolled && self.progress == MAX_PROGRESS
    }

    /// Returns a copy with updated progress and access time.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` under the same rules as [`CourseProgress::new`].
    pub fn with_progress(&self, progress: u8, at: DateTime<Utc>) -> Result<Self, ProgressError> {
        Self::new(self.enrolled, i64::from(progress), Some(at))
    }
}
