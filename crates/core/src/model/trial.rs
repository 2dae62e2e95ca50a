use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ids::AreaKey;

/// Attempts used per area on one calendar day.
///
/// Counters only ever describe `day`; a record for any other day is stale
/// and must be reset before use (see [`TrialRecord::for_day`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    day: NaiveDate,
    #[serde(default)]
    used: BTreeMap<AreaKey, u32>,
}

impl TrialRecord {
    #[must_use]
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            used: BTreeMap::new(),
        }
    }

    /// Returns this record if it belongs to `today`, otherwise a zeroed one.
    #[must_use]
    pub fn for_day(self, today: NaiveDate) -> Self {
        if self.day == today {
            self
        } else {
            Self::new(today)
        }
    }

    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    #[must_use]
    pub fn used(&self, area: &AreaKey) -> u32 {
        self.used.get(area).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn remaining(&self, area: &AreaKey, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.used(area))
    }

    /// Consume one attempt for `area`.
    ///
    /// Returns `false` and leaves the record untouched once the area is exhausted.
    pub fn try_register(&mut self, area: &AreaKey, max_attempts: u32) -> bool {
        if self.remaining(area, max_attempts) == 0 {
            return false;
        }
        *self.used.entry(area.clone()).or_insert(0) += 1;
        true
    }

    /// Iterate areas with at least one attempt today.
    pub fn areas(&self) -> impl Iterator<Item = (&AreaKey, u32)> {
        self.used.iter().map(|(area, used)| (area, *used))
    }
}
