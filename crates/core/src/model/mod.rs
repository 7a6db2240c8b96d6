mod certificate;
mod change;
mod course;
mod ids;
mod progress;

pub use certificate::Certificate;
pub use change::{ChangeKind, EventFilter, ParseEventFilterError, Resource};
pub use course::{Course, CourseError, DEFAULT_PASSING_SCORE};
pub use ids::{ChapterId, CourseId, LessonId, ParseIdError, UserId};
pub use progress::{CourseProgress, MAX_PROGRESS, ProgressError};
