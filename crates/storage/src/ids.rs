//! Identifier reconciliation at the edge of the remote store.
//!
//! Rows coming back from the backend carry ids either as JSON numbers or as
//! strings, depending on which client wrote them. Everything above this
//! module works with the canonical id types from `course_core::model`.

use std::fmt;

use course_core::model::{ChapterId, CourseId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::repository::StorageError;

/// An identifier as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| RawId::Text(value.to_string()), RawId::Number)
    }

    /// Reads an id out of a JSON value. Returns `None` for anything that is
    /// neither a number nor a string.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(
                n.as_i64()
                    .map_or_else(|| RawId::Text(n.to_string()), RawId::Number),
            ),
            Value::String(s) => Some(RawId::Text(s.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            RawId::Number(n) => Value::from(*n),
            RawId::Text(t) => Value::from(t.as_str()),
        }
    }
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Number(n) => write!(f, "{n}"),
            RawId::Text(t) => f.write_str(t),
        }
    }
}

impl From<CourseId> for RawId {
    fn from(id: CourseId) -> Self {
        RawId::from_u64(id.value())
    }
}

impl From<ChapterId> for RawId {
    fn from(id: ChapterId) -> Self {
        RawId::from_u64(id.value())
    }
}

/// Textual form of an id; `None` when the id is absent.
#[must_use]
pub fn to_text(id: Option<&RawId>) -> Option<String> {
    id.map(|id| match to_number(id.clone()) {
        RawId::Number(n) => n.to_string(),
        RawId::Text(t) => t,
    })
}

/// Numeric form of an id when its text is an integer; otherwise the input
/// is returned unchanged.
#[must_use]
pub fn to_number(id: RawId) -> RawId {
    match id {
        RawId::Text(text) => match text.trim().parse::<i64>() {
            Ok(n) => RawId::Number(n),
            Err(_) => RawId::Text(text),
        },
        number @ RawId::Number(_) => number,
    }
}

/// Compares two ids by their normalized text. Two absent ids are not equal.
#[must_use]
pub fn ids_equal(a: Option<&RawId>, b: Option<&RawId>) -> bool {
    match (to_text(a), to_text(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Equality used by row filters: id-like values compare by normalized text,
/// everything else structurally.
pub(crate) fn json_values_equal(a: &Value, b: &Value) -> bool {
    match (RawId::from_json(a), RawId::from_json(b)) {
        (Some(a), Some(b)) => ids_equal(Some(&a), Some(&b)),
        _ => a == b,
    }
}

fn canonical_u64(field: &'static str, raw: &RawId) -> Result<u64, StorageError> {
    match to_number(raw.clone()) {
        RawId::Number(n) => u64::try_from(n)
            .map_err(|_| StorageError::Serialization(format!("{field} is negative: {n}"))),
        RawId::Text(t) => t
            .trim()
            .parse::<u64>()
            .map_err(|_| StorageError::Serialization(format!("{field} is not numeric: {t}"))),
    }
}

pub(crate) fn course_id(raw: &RawId) -> Result<CourseId, StorageError> {
    canonical_u64("course_id", raw).map(CourseId::new)
}

pub(crate) fn chapter_id(raw: &RawId) -> Result<ChapterId, StorageError> {
    canonical_u64("chapter_id", raw).map(ChapterId::new)
}

pub(crate) fn user_id(raw: &str) -> Result<UserId, StorageError> {
    raw.parse()
        .map_err(|_| StorageError::Serialization(format!("invalid user_id: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_across_representations() {
        assert!(ids_equal(
            Some(&RawId::Number(5)),
            Some(&RawId::Text("5".into()))
        ));
        assert!(!ids_equal(
            Some(&RawId::Number(5)),
            Some(&RawId::Text("6".into()))
        ));
    }

    #[test]
    fn absent_ids_are_never_equal() {
        assert!(!ids_equal(None, None));
        assert!(!ids_equal(Some(&RawId::Number(1)), None));
    }

    #[test]
    fn to_number_keeps_non_numeric_text() {
        assert_eq!(to_number(RawId::Text("abc".into())), RawId::Text("abc".into()));
        assert_eq!(to_number(RawId::Text("42".into())), RawId::Number(42));
        assert_eq!(to_number(RawId::Text("4.5".into())), RawId::Text("4.5".into()));
        assert_eq!(to_number(RawId::Number(7)), RawId::Number(7));
    }

    #[test]
    fn to_text_handles_absent_and_present() {
        assert_eq!(to_text(None), None);
        assert_eq!(to_text(Some(&RawId::Number(9))), Some("9".into()));
        assert_eq!(to_text(Some(&RawId::Text(" 09 ".into()))), Some("9".into()));
    }

    #[test]
    fn deserializes_either_form() {
        let n: RawId = serde_json::from_value(json!(3)).unwrap();
        let t: RawId = serde_json::from_value(json!("3")).unwrap();
        assert_eq!(course_id(&n).unwrap(), CourseId::new(3));
        assert_eq!(course_id(&t).unwrap(), CourseId::new(3));
        assert!(course_id(&RawId::Text("intro".into())).is_err());
        assert!(course_id(&RawId::Number(-1)).is_err());
    }

    #[test]
    fn json_equality_normalizes_ids_only() {
        assert!(json_values_equal(&json!(5), &json!("5")));
        assert!(json_values_equal(&json!(null), &json!(null)));
        assert!(!json_values_equal(&json!(null), &json!(0)));
        assert!(json_values_equal(&json!(true), &json!(true)));
    }
}
