use chrono::{Duration, FixedOffset};
use quiz_core::model::Tier;
use quiz_core::time::utc_offset;

use crate::error::SettingsError;

/// Tunables shared by the quota, ledger and session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSettings {
    max_attempts_per_area: u32,
    free_question_limit: usize,
    premium_question_limit: usize,
    snapshot_ttl: Duration,
    utc_offset: FixedOffset,
    shuffle: bool,
}

impl Default for QuizSettings {
    /// 3 daily attempts per area, 10 questions for free users and 20 for
    /// premium, snapshots kept for 24 hours, days counted in UTC, shuffled.
    fn default() -> Self {
        Self {
            max_attempts_per_area: 3,
            free_question_limit: 10,
            premium_question_limit: 20,
            snapshot_ttl: Duration::hours(24),
            utc_offset: utc_offset(),
            shuffle: true,
        }
    }
}

impl QuizSettings {
    /// Creates custom settings; offset and shuffle keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if any limit is zero or the TTL is not positive.
    pub fn new(
        max_attempts_per_area: u32,
        free_question_limit: usize,
        premium_question_limit: usize,
        snapshot_ttl: Duration,
    ) -> Result<Self, SettingsError> {
        if max_attempts_per_area == 0 {
            return Err(SettingsError::InvalidMaxAttempts);
        }
        if free_question_limit == 0 || premium_question_limit == 0 {
            return Err(SettingsError::InvalidQuestionLimit);
        }
        if snapshot_ttl <= Duration::zero() {
            return Err(SettingsError::InvalidSnapshotTtl);
        }

        Ok(Self {
            max_attempts_per_area,
            free_question_limit,
            premium_question_limit,
            snapshot_ttl,
            ..Self::default()
        })
    }

    /// Offset used to decide which calendar day an instant belongs to.
    #[must_use]
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    #[must_use]
    pub fn max_attempts_per_area(&self) -> u32 {
        self.max_attempts_per_area
    }

    /// Question cap for a session at the given tier.
    #[must_use]
    pub fn question_limit(&self, tier: Tier) -> usize {
        match tier {
            Tier::Free => self.free_question_limit,
            Tier::Premium => self.premium_question_limit,
        }
    }

    #[must_use]
    pub fn snapshot_ttl(&self) -> Duration {
        self.snapshot_ttl
    }

    #[must_use]
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    #[must_use]
    pub fn shuffle(&self) -> bool {
        self.shuffle
    }
}
