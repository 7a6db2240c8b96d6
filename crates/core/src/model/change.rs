use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── RESOURCE ─────────────────────────────────────────────────────────────────
//

/// A named collection of records in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

impl Resource {
    pub const COURSES: &'static str = "courses";
    pub const ENROLLMENTS: &'static str = "enrollments";
    pub const LESSON_PROGRESS: &'static str = "lesson_progress";
    pub const TEST_RESULTS: &'static str = "test_results";
    pub const ANSWER_KEYS: &'static str = "answer_keys";

    /// Column holding the owning user on user-owned resources.
    pub const OWNER_COLUMN: &'static str = "user_id";

    const USER_OWNED: [&'static str; 3] =
        [Self::ENROLLMENTS, Self::LESSON_PROGRESS, Self::TEST_RESULTS];

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn courses() -> Self {
        Self::new(Self::COURSES)
    }

    #[must_use]
    pub fn enrollments() -> Self {
        Self::new(Self::ENROLLMENTS)
    }

    #[must_use]
    pub fn lesson_progress() -> Self {
        Self::new(Self::LESSON_PROGRESS)
    }

    #[must_use]
    pub fn test_results() -> Self {
        Self::new(Self::TEST_RESULTS)
    }

    #[must_use]
    pub fn answer_keys() -> Self {
        Self::new(Self::ANSWER_KEYS)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether rows of this resource carry an owning `user_id`.
    #[must_use]
    pub fn is_user_owned(&self) -> bool {
        Self::USER_OWNED.contains(&self.0.as_str())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ─── CHANGE KINDS ─────────────────────────────────────────────────────────────
//

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// Which change kinds a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFilter {
    Created,
    Updated,
    Deleted,
    #[default]
    Any,
}

impl EventFilter {
    #[must_use]
    pub fn matches(self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventFilter::Any, _)
                | (EventFilter::Created, ChangeKind::Created)
                | (EventFilter::Updated, ChangeKind::Updated)
                | (EventFilter::Deleted, ChangeKind::Deleted)
        )
    }
}

/// Error returned when an event filter name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event filter: {0}")]
pub struct ParseEventFilterError(String);

impl std::str::FromStr for EventFilter {
    type Err = ParseEventFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "insert" => Ok(Self::Created),
            "updated" | "update" => Ok(Self::Updated),
            "deleted" | "delete" => Ok(Self::Deleted),
            "any" | "*" => Ok(Self::Any),
            other => Err(ParseEventFilterError(other.to_owned())),
        }
    }
}
