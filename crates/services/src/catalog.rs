use std::sync::Arc;

use course_core::model::{Course, CourseId, CourseProgress, UserId};
use storage::repository::CourseRepository;

use crate::error::{CatalogError, ProgressError};
use crate::progress_cache::{FetchOptions, ProgressCache};

/// A course the user is enrolled in, with its current progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledCourse {
    pub course: Course,
    pub progress: CourseProgress,
}

/// Read side of the course catalog.
#[derive(Clone)]
pub struct CatalogService {
    courses: Arc<dyn CourseRepository>,
    progress: Arc<ProgressCache>,
}

impl CatalogService {
    #[must_use]
    pub fn new(courses: Arc<dyn CourseRepository>, progress: Arc<ProgressCache>) -> Self {
        Self { courses, progress }
    }

    /// All courses ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if the catalog cannot be read.
    pub async fn list_courses(&self) -> Result<Vec<Course>, CatalogError> {
        Ok(self.courses.list_courses().await?)
    }

    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if the catalog cannot be read.
    pub async fn course(&self, id: CourseId) -> Result<Option<Course>, CatalogError> {
        Ok(self.courses.get_course(id).await?)
    }

    /// Courses `user` is enrolled in, in catalog order.
    ///
    /// Progress comes through the cache, so repeated calls inside the
    /// freshness window do not hit the store per course.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Progress` if the user is missing or a progress
    /// fetch fails, and `CatalogError::Storage` if the catalog cannot be read.
    pub async fn my_courses(
        &self,
        user: Option<UserId>,
    ) -> Result<Vec<EnrolledCourse>, CatalogError> {
        let user = user.ok_or(ProgressError::NotAuthenticated)?;
        let mut enrolled = Vec::new();
        for course in self.courses.list_courses().await? {
            let progress = self
                .progress
                .get_progress(Some(user), course.id(), FetchOptions::default())
                .await?;
            if progress.enrolled() {
                enrolled.push(EnrolledCourse { course, progress });
            }
        }
        Ok(enrolled)
    }
}
