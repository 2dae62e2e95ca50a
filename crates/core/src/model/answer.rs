use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{AreaKey, QuestionId, SubjectKey};

/// Progress ledger entry for one answered question.
///
/// A user holds at most one live record per `(area, question_id)`; newer
/// answers replace older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub area: AreaKey,
    pub question_id: QuestionId,
    pub correct: bool,
    pub time_spent_secs: u32,
    pub answered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subarea: Option<SubjectKey>,
}

impl AnswerRecord {
    #[must_use]
    pub fn new(
        area: AreaKey,
        question_id: QuestionId,
        correct: bool,
        time_spent_secs: u32,
        answered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            area,
            question_id,
            correct,
            time_spent_secs,
            answered_at,
            subarea: None,
        }
    }

    #[must_use]
    pub fn with_subarea(mut self, subarea: Option<SubjectKey>) -> Self {
        self.subarea = subarea;
        self
    }

    /// True when both records describe the same question in the same area.
    #[must_use]
    pub fn same_slot(&self, other: &AnswerRecord) -> bool {
        self.area == other.area && self.question_id == other.question_id
    }
}
