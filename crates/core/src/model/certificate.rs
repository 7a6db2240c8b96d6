use chrono::{DateTime, Utc};

use crate::model::ids::{CourseId, UserId};

/// Proof that a user passed the final test of a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_title: String,
    /// Best passing score across attempts.
    pub score: u8,
    /// Time of the first passing attempt.
    pub issued_at: DateTime<Utc>,
}

impl Certificate {
    /// Stable human-readable serial, e.g. `CERT-12-1a2b3c4d`.
    #[must_use]
    pub fn serial(&self) -> String {
        let user = self.user_id.as_uuid().simple().to_string();
        format!("CERT-{}-{}", self.course_id, &user[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use uuid::Uuid;

    #[test]
    fn serial_uses_course_and_user_prefix() {
        let user = UserId::new(Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap());
        let cert = Certificate {
            user_id: user,
            course_id: CourseId::new(12),
            course_title: "Rust".into(),
            score: 88,
            issued_at: fixed_now(),
        };
        assert_eq!(cert.serial(), "CERT-12-1a2b3c4d");
    }
}
