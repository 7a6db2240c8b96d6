use thiserror::Error;

use crate::model::{CourseError, ParseIdError, ProgressError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Course, CourseId};

    fn build(title: &str) -> Result<Course, Error> {
        Ok(Course::new(CourseId::new(1), title, None, 70, 1)?)
    }

    #[test]
    fn wraps_domain_errors() {
        assert!(matches!(build(" "), Err(Error::Course(CourseError::EmptyTitle))));
        let parsed: Result<CourseId, Error> = "x".parse::<CourseId>().map_err(Error::from);
        assert!(matches!(parsed, Err(Error::Id(_))));
    }
}
