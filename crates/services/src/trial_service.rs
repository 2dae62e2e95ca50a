use std::sync::Arc;

use chrono::FixedOffset;
use tracing::debug;

use quiz_core::model::{AreaKey, TrialRecord, UserId};
use quiz_core::time::Clock;
use storage::repository::{KeyValueStore, load_json, save_json};

use crate::error::TrialError;
use crate::settings::QuizSettings;

/// Daily free-tier attempt quota per user and area.
///
/// The stored record is keyed by calendar day; a record from any earlier day
/// reads as all-zero and is overwritten on the next registration. There is no
/// timer: the reset happens lazily on access.
#[derive(Clone)]
pub struct TrialQuotaService {
    clock: Clock,
    store: Arc<dyn KeyValueStore>,
    max_attempts: u32,
    utc_offset: FixedOffset,
}

impl TrialQuotaService {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<dyn KeyValueStore>, settings: &QuizSettings) -> Self {
        Self {
            clock,
            store,
            max_attempts: settings.max_attempts_per_area(),
            utc_offset: settings.utc_offset(),
        }
    }

    fn key(user: &UserId) -> String {
        format!("trial:{user}")
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Today's usage for `user`, with stale days already reset.
    ///
    /// # Errors
    ///
    /// Returns `TrialError::Storage` if the record cannot be read.
    pub async fn usage(&self, user: &UserId) -> Result<TrialRecord, TrialError> {
        let today = self.clock.today(self.utc_offset);
        let stored: Option<TrialRecord> = load_json(self.store.as_ref(), &Self::key(user)).await?;
        Ok(stored.map_or_else(|| TrialRecord::new(today), |record| record.for_day(today)))
    }

    /// Attempts left today in `area`, between 0 and the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns `TrialError::Storage` if the record cannot be read.
    pub async fn get_remaining(&self, user: &UserId, area: &AreaKey) -> Result<u32, TrialError> {
        let record = self.usage(user).await?;
        Ok(record.remaining(area, self.max_attempts))
    }

    /// Whether a quota-gated session may start in `area`.
    ///
    /// # Errors
    ///
    /// Returns `TrialError::Storage` if the record cannot be read.
    pub async fn can_start(&self, user: &UserId, area: &AreaKey) -> Result<bool, TrialError> {
        Ok(self.get_remaining(user, area).await? > 0)
    }

    /// Consume one attempt.
    ///
    /// Returns `false` without writing anything when the area is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `TrialError::Storage` if the record cannot be read or written.
    pub async fn register_attempt(&self, user: &UserId, area: &AreaKey) -> Result<bool, TrialError> {
        let mut record = self.usage(user).await?;
        if !record.try_register(area, self.max_attempts) {
            debug!(user = %user, area = %area, "trial quota already exhausted");
            return Ok(false);
        }
        save_json(self.store.as_ref(), &Self::key(user), &record).await?;
        debug!(
            user = %user,
            area = %area,
            used = record.used(area),
            "trial attempt registered"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quiz_core::ManualClock;
    use quiz_core::time::fixed_now;
    use serde_json::json;
    use storage::repository::InMemoryStore;

    fn service(clock: &ManualClock, store: &InMemoryStore) -> TrialQuotaService {
        TrialQuotaService::new(
            Clock::from(clock.clone()),
            Arc::new(store.clone()),
            &QuizSettings::default(),
        )
    }

    #[tokio::test]
    async fn remaining_decreases_by_one_until_exhausted() {
        let clock = ManualClock::new(fixed_now());
        let store = InMemoryStore::new();
        let trials = service(&clock, &store);
        let user = UserId::new("ana");
        let area = AreaKey::new("matematica");

        assert_eq!(trials.get_remaining(&user, &area).await.unwrap(), 3);
        for expected in [2, 1, 0] {
            assert!(trials.register_attempt(&user, &area).await.unwrap());
            assert_eq!(trials.get_remaining(&user, &area).await.unwrap(), expected);
        }

        assert!(!trials.register_attempt(&user, &area).await.unwrap());
        assert_eq!(trials.get_remaining(&user, &area).await.unwrap(), 0);
        assert!(!trials.can_start(&user, &area).await.unwrap());
    }

    #[tokio::test]
    async fn new_day_resets_every_area() {
        let clock = ManualClock::new(fixed_now());
        let store = InMemoryStore::new();
        let trials = service(&clock, &store);
        let user = UserId::new("ana");
        let math = AreaKey::new("matematica");
        let prog = AreaKey::new("programacao");

        for _ in 0..3 {
            trials.register_attempt(&user, &math).await.unwrap();
        }
        trials.register_attempt(&user, &prog).await.unwrap();

        clock.advance(Duration::days(1));
        assert_eq!(trials.get_remaining(&user, &math).await.unwrap(), 3);
        assert_eq!(trials.get_remaining(&user, &prog).await.unwrap(), 3);

        assert!(trials.register_attempt(&user, &math).await.unwrap());
        let usage = trials.usage(&user).await.unwrap();
        assert_eq!(usage.used(&math), 1);
        assert_eq!(usage.used(&prog), 0);
    }

    #[tokio::test]
    async fn stale_stored_record_is_ignored() {
        let clock = ManualClock::new(fixed_now());
        let store = InMemoryStore::new();
        store
            .set(
                "trial:ana",
                json!({"day": "2001-01-01", "used": {"matematica": 3}}),
            )
            .await
            .unwrap();
        let trials = service(&clock, &store);

        let remaining = trials
            .get_remaining(&UserId::new("ana"), &AreaKey::new("matematica"))
            .await
            .unwrap();
        assert_eq!(remaining, 3);
    }

    #[tokio::test]
    async fn users_and_areas_do_not_share_quota() {
        let clock = ManualClock::new(fixed_now());
        let store = InMemoryStore::new();
        let trials = service(&clock, &store);
        let math = AreaKey::new("matematica");

        for _ in 0..3 {
            trials.register_attempt(&UserId::new("ana"), &math).await.unwrap();
        }
        assert_eq!(trials.get_remaining(&UserId::new("bia"), &math).await.unwrap(), 3);
        assert_eq!(
            trials
                .get_remaining(&UserId::anonymous(), &AreaKey::new("fisica"))
                .await
                .unwrap(),
            3
        );
    }
}
