use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::answer::AnswerRecord;
use crate::model::ids::{AreaKey, SubjectKey};
use crate::time::calendar_day;

/// `part / whole` as a whole percentage, rounding halves up.
///
/// Returns 0 when `whole` is 0.
#[must_use]
pub fn percentage(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    let rounded = (part.saturating_mul(100) + whole / 2) / whole;
    u32::try_from(rounded).unwrap_or(u32::MAX)
}

/// Length of the run of consecutive days ending today, or yesterday when
/// today has no activity yet.
///
/// Older runs separated by a gap do not count.
#[must_use]
pub fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut anchor = if days.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) if days.contains(&yesterday) => yesterday,
            _ => return 0,
        }
    };

    let mut streak = 1;
    while let Some(previous) = anchor.pred_opt() {
        if !days.contains(&previous) {
            break;
        }
        streak += 1;
        anchor = previous;
    }
    streak
}

#[derive(Debug, Default)]
struct Tally {
    completed: u32,
    correct: u32,
    time_secs: u64,
    last_activity: Option<DateTime<Utc>>,
}

impl Tally {
    fn add(&mut self, record: &AnswerRecord) {
        self.completed = self.completed.saturating_add(1);
        if record.correct {
            self.correct = self.correct.saturating_add(1);
        }
        self.time_secs = self.time_secs.saturating_add(u64::from(record.time_spent_secs));
        if self.last_activity.is_none_or(|last| record.answered_at > last) {
            self.last_activity = Some(record.answered_at);
        }
    }

    fn accuracy(&self) -> u32 {
        percentage(u64::from(self.correct), u64::from(self.completed))
    }
}

/// Aggregate statistics for a user, derived from the ledger on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub total_completed: u32,
    pub total_correct: u32,
    pub accuracy: u32,
    pub total_time_secs: u64,
    pub current_streak: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ProgressStats {
    /// Derive statistics; `offset` decides which calendar day each record falls on.
    #[must_use]
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a AnswerRecord>,
        today: NaiveDate,
        offset: FixedOffset,
    ) -> Self {
        let mut tally = Tally::default();
        let mut days = BTreeSet::new();
        for record in records {
            tally.add(record);
            days.insert(calendar_day(record.answered_at, offset));
        }

        Self {
            total_completed: tally.completed,
            total_correct: tally.correct,
            accuracy: tally.accuracy(),
            total_time_secs: tally.time_secs,
            current_streak: current_streak(&days, today),
            last_activity: tally.last_activity,
        }
    }
}

/// Statistics restricted to one area, optionally narrowed to a subarea.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaStats {
    pub area: AreaKey,
    pub subarea: Option<SubjectKey>,
    pub total_completed: u32,
    pub total_correct: u32,
    pub accuracy: u32,
    pub total_time_secs: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AreaStats {
    /// Tally the records that belong to `area` (and `subarea` when given).
    #[must_use]
    pub fn from_records<'a>(
        area: &AreaKey,
        subarea: Option<&SubjectKey>,
        records: impl IntoIterator<Item = &'a AnswerRecord>,
    ) -> Self {
        let mut tally = Tally::default();
        for record in records {
            if &record.area != area {
                continue;
            }
            if subarea.is_some() && record.subarea.as_ref() != subarea {
                continue;
            }
            tally.add(record);
        }

        Self {
            area: area.clone(),
            subarea: subarea.cloned(),
            total_completed: tally.completed,
            total_correct: tally.correct,
            accuracy: tally.accuracy(),
            total_time_secs: tally.time_secs,
            last_activity: tally.last_activity,
        }
    }
}
