//! Scoring for chapter and course tests.
//!
//! Everything here is pure: answers go in, a percentage and a feedback tier
//! come out. Persistence of results lives in the services crate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::ChapterId;

//
// ─── ANSWERS ──────────────────────────────────────────────────────────────────
//

/// A selected (or correct) option: either an option index or free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Index(i64),
    Text(String),
}

impl AnswerValue {
    /// Compares two answers, treating `Index(2)` and `Text("2")` as the same
    /// option. Free text is compared after trimming.
    #[must_use]
    pub fn matches(&self, other: &AnswerValue) -> bool {
        match (self, other) {
            (AnswerValue::Index(a), AnswerValue::Index(b)) => a == b,
            (AnswerValue::Text(a), AnswerValue::Text(b)) => a.trim() == b.trim(),
            (AnswerValue::Index(i), AnswerValue::Text(t))
            | (AnswerValue::Text(t), AnswerValue::Index(i)) => {
                t.trim().parse::<i64>().is_ok_and(|parsed| parsed == *i)
            }
        }
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Index(value)
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_owned())
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Index(i) => write!(f, "{i}"),
            AnswerValue::Text(t) => f.write_str(t),
        }
    }
}

/// Answers given by a user, keyed by question index.
pub type AnswerMap = BTreeMap<u32, AnswerValue>;

/// Correct answers, keyed by question index.
pub type AnswerKey = BTreeMap<u32, AnswerValue>;

/// Which test an answer sheet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestScope {
    Chapter(ChapterId),
    /// The final test covering the whole course.
    Course,
}

impl TestScope {
    #[must_use]
    pub fn chapter_id(self) -> Option<ChapterId> {
        match self {
            TestScope::Chapter(id) => Some(id),
            TestScope::Course => None,
        }
    }
}

//
// ─── SCORING ──────────────────────────────────────────────────────────────────
//

/// Number of keyed questions answered correctly.
#[must_use]
pub fn correct_count(answers: &AnswerMap, key: &AnswerKey) -> usize {
    key.iter()
        .filter(|(question, expected)| {
            answers
                .get(question)
                .is_some_and(|given| given.matches(expected))
        })
        .count()
}

/// Percentage of keyed questions answered correctly, rounded half up.
///
/// Returns 0 when either map is empty. Answers to questions that are not in
/// the key are ignored.
#[must_use]
pub fn score(answers: &AnswerMap, key: &AnswerKey) -> u8 {
    if answers.is_empty() || key.is_empty() {
        return 0;
    }
    let correct = correct_count(answers, key);
    let total = key.len();
    // (200c + t) / 2t == round(100c / t) for non-negative integers
    let rounded = (200 * correct + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

#[must_use]
pub fn passed(score: u8, passing_score: u8) -> bool {
    score >= passing_score
}

//
// ─── FEEDBACK ─────────────────────────────────────────────────────────────────
//

/// Categorical bucket shown next to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackTier {
    Excellent,
    Great,
    Passed,
    Close,
    Failed,
}

impl FeedbackTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackTier::Excellent => "excellent",
            FeedbackTier::Great => "great",
            FeedbackTier::Passed => "passed",
            FeedbackTier::Close => "close",
            FeedbackTier::Failed => "failed",
        }
    }

    fn message(self) -> &'static str {
        match self {
            FeedbackTier::Excellent => "Perfect score! Outstanding work.",
            FeedbackTier::Great => "Great job! You clearly know this material.",
            FeedbackTier::Passed => "You passed. Nice work.",
            FeedbackTier::Close => "So close! Review the material and try again.",
            FeedbackTier::Failed => "Keep studying and try again.",
        }
    }
}

impl fmt::Display for FeedbackTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub tier: FeedbackTier,
    pub message: &'static str,
}

/// Feedback tier for a score. Boundary values belong to the better tier.
#[must_use]
pub fn feedback(score: u8, passing_score: u8) -> Feedback {
    let tier = if score >= 100 {
        FeedbackTier::Excellent
    } else if score >= 90 {
        FeedbackTier::Great
    } else if score >= passing_score {
        FeedbackTier::Passed
    } else if score >= passing_score.saturating_sub(10) {
        FeedbackTier::Close
    } else {
        FeedbackTier::Failed
    };
    Feedback {
        tier,
        message: tier.message(),
    }
}

/// Everything derived from one graded answer sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub score: u8,
    pub correct: usize,
    pub total: usize,
    pub passed: bool,
    pub feedback: Feedback,
}

#[must_use]
pub fn evaluate(answers: &AnswerMap, key: &AnswerKey, passing_score: u8) -> TestOutcome {
    let score = score(answers, key);
    TestOutcome {
        score,
        correct: correct_count(answers, key),
        total: key.len(),
        passed: passed(score, passing_score),
        feedback: feedback(score, passing_score),
    }
}
