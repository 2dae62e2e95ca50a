use std::collections::HashMap;
use std::sync::Arc;

use chrono::FixedOffset;
use tracing::debug;

use quiz_core::model::{AnswerRecord, AreaKey, AreaStats, ProgressStats, QuestionId, SubjectKey, UserId};
use quiz_core::time::Clock;
use quiz_core::xp::{LevelSummary, XpTotals};
use storage::repository::{KeyValueStore, load_json, save_json};

use crate::error::ProgressError;
use crate::settings::QuizSettings;

/// Per-user answer history plus derived statistics and XP.
///
/// Records are upserted by `(area, question_id)`: answering a question again
/// replaces the earlier record. Statistics are recomputed on every read.
#[derive(Clone)]
pub struct ProgressLedgerService {
    clock: Clock,
    store: Arc<dyn KeyValueStore>,
    utc_offset: FixedOffset,
}

fn upsert(records: &mut Vec<AnswerRecord>, record: AnswerRecord) {
    match records.iter_mut().find(|existing| existing.same_slot(&record)) {
        Some(slot) => *slot = record,
        None => records.push(record),
    }
}

impl ProgressLedgerService {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<dyn KeyValueStore>, settings: &QuizSettings) -> Self {
        Self {
            clock,
            store,
            utc_offset: settings.utc_offset(),
        }
    }

    fn records_key(user: &UserId) -> String {
        format!("progress:{user}")
    }

    fn xp_key(user: &UserId) -> String {
        format!("xp:{user}")
    }

    /// Every live record for `user`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the ledger cannot be read.
    pub async fn records(&self, user: &UserId) -> Result<Vec<AnswerRecord>, ProgressError> {
        let stored = load_json(self.store.as_ref(), &Self::records_key(user)).await?;
        Ok(stored.unwrap_or_default())
    }

    /// Upsert a single record.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the ledger cannot be read or written.
    pub async fn append(&self, user: &UserId, record: AnswerRecord) -> Result<(), ProgressError> {
        self.append_batch(user, std::slice::from_ref(&record)).await
    }

    /// Upsert a batch of records with a single write.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the ledger cannot be read or written.
    pub async fn append_batch(
        &self,
        user: &UserId,
        batch: &[AnswerRecord],
    ) -> Result<(), ProgressError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut records = self.records(user).await?;
        for record in batch {
            upsert(&mut records, record.clone());
        }
        save_json(self.store.as_ref(), &Self::records_key(user), &records).await?;
        debug!(user = %user, appended = batch.len(), total = records.len(), "ledger updated");
        Ok(())
    }

    /// Overall statistics, streak included.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the ledger cannot be read.
    pub async fn get_stats(&self, user: &UserId) -> Result<ProgressStats, ProgressError> {
        let records = self.records(user).await?;
        let today = self.clock.today(self.utc_offset);
        Ok(ProgressStats::from_records(&records, today, self.utc_offset))
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the ledger cannot be read.
    pub async fn get_area_stats(
        &self,
        user: &UserId,
        area: &AreaKey,
    ) -> Result<AreaStats, ProgressError> {
        let records = self.records(user).await?;
        Ok(AreaStats::from_records(area, None, &records))
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the ledger cannot be read.
    pub async fn get_subarea_stats(
        &self,
        user: &UserId,
        area: &AreaKey,
        subarea: &SubjectKey,
    ) -> Result<AreaStats, ProgressError> {
        let records = self.records(user).await?;
        Ok(AreaStats::from_records(area, Some(subarea), &records))
    }

    /// Last known correctness of every answered question in `area`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the ledger cannot be read.
    pub async fn area_outcomes(
        &self,
        user: &UserId,
        area: &AreaKey,
    ) -> Result<HashMap<QuestionId, bool>, ProgressError> {
        let records = self.records(user).await?;
        Ok(records
            .into_iter()
            .filter(|record| &record.area == area)
            .map(|record| (record.question_id, record.correct))
            .collect())
    }

    /// Add session XP to the account total and, when given, to `area`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the totals cannot be read or written.
    pub async fn award_xp(
        &self,
        user: &UserId,
        area: Option<&AreaKey>,
        xp: u32,
    ) -> Result<XpTotals, ProgressError> {
        let key = Self::xp_key(user);
        let mut totals: XpTotals = load_json(self.store.as_ref(), &key).await?.unwrap_or_default();
        totals.add(area, xp);
        save_json(self.store.as_ref(), &key, &totals).await?;
        Ok(totals)
    }

    /// Account level and per-area levels.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the totals cannot be read.
    pub async fn levels(&self, user: &UserId) -> Result<LevelSummary, ProgressError> {
        let totals: XpTotals = load_json(self.store.as_ref(), &Self::xp_key(user))
            .await?
            .unwrap_or_default();
        Ok(totals.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quiz_core::time::{fixed_clock, fixed_now};
    use storage::repository::InMemoryStore;

    fn ledger() -> ProgressLedgerService {
        ProgressLedgerService::new(
            fixed_clock(),
            Arc::new(InMemoryStore::new()),
            &QuizSettings::default(),
        )
    }

    fn record(id: &str, correct: bool, secs: u32, days_ago: i64) -> AnswerRecord {
        AnswerRecord::new(
            AreaKey::new("matematica"),
            QuestionId::new(id),
            correct,
            secs,
            fixed_now() - Duration::days(days_ago),
        )
    }

    #[tokio::test]
    async fn repeated_question_replaces_earlier_record() {
        let ledger = ledger();
        let user = UserId::new("ana");
        ledger.append(&user, record("q1", false, 50, 1)).await.unwrap();
        ledger.append(&user, record("q2", true, 10, 1)).await.unwrap();
        ledger.append(&user, record("q1", true, 20, 0)).await.unwrap();

        let records = ledger.records(&user).await.unwrap();
        assert_eq!(records.len(), 2);

        let stats = ledger
            .get_area_stats(&user, &AreaKey::new("matematica"))
            .await
            .unwrap();
        assert_eq!(stats.total_completed, 2);
        assert_eq!(stats.total_correct, 2);
        assert_eq!(stats.total_time_secs, 30);
    }

    #[tokio::test]
    async fn same_question_in_other_area_is_separate() {
        let ledger = ledger();
        let user = UserId::new("ana");
        ledger.append(&user, record("q1", true, 10, 0)).await.unwrap();
        let other = AnswerRecord::new(
            AreaKey::new("fisica"),
            QuestionId::new("q1"),
            false,
            10,
            fixed_now(),
        );
        ledger.append(&user, other).await.unwrap();
        assert_eq!(ledger.records(&user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stats_include_streak_and_accuracy() {
        let ledger = ledger();
        let user = UserId::new("ana");
        ledger
            .append_batch(
                &user,
                &[
                    record("a", true, 30, 0),
                    record("b", false, 30, 1),
                    record("c", true, 30, 2),
                ],
            )
            .await
            .unwrap();

        let stats = ledger.get_stats(&user).await.unwrap();
        assert_eq!(stats.current_streak, 3);
        assert_eq!(stats.accuracy, 67);
        assert_eq!(stats.total_time_secs, 90);
    }

    #[tokio::test]
    async fn empty_ledger_reads_as_zero() {
        let stats = ledger().get_stats(&UserId::anonymous()).await.unwrap();
        assert_eq!(stats.total_completed, 0);
        assert_eq!(stats.accuracy, 0);
        assert_eq!(stats.current_streak, 0);
    }

    #[tokio::test]
    async fn subarea_stats_only_count_subarea() {
        let ledger = ledger();
        let user = UserId::new("ana");
        let algebra = SubjectKey::new("algebra");
        ledger
            .append_batch(
                &user,
                &[
                    record("a", true, 5, 0).with_subarea(Some(algebra.clone())),
                    record("b", false, 5, 0),
                ],
            )
            .await
            .unwrap();
        let stats = ledger
            .get_subarea_stats(&user, &AreaKey::new("matematica"), &algebra)
            .await
            .unwrap();
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.accuracy, 100);
    }

    #[tokio::test]
    async fn area_outcomes_reflect_latest_answer() {
        let ledger = ledger();
        let user = UserId::new("ana");
        ledger.append(&user, record("q1", true, 5, 1)).await.unwrap();
        ledger.append(&user, record("q1", false, 5, 0)).await.unwrap();
        let outcomes = ledger
            .area_outcomes(&user, &AreaKey::new("matematica"))
            .await
            .unwrap();
        assert_eq!(outcomes.get(&QuestionId::new("q1")), Some(&false));
    }

    #[tokio::test]
    async fn xp_accumulates_into_levels() {
        let ledger = ledger();
        let user = UserId::new("ana");
        let math = AreaKey::new("matematica");
        ledger.award_xp(&user, Some(&math), 85).await.unwrap();
        ledger.award_xp(&user, Some(&math), 30).await.unwrap();

        let levels = ledger.levels(&user).await.unwrap();
        assert_eq!(levels.total_xp, 115);
        assert_eq!(levels.level, 2);
        assert_eq!(levels.areas[&math].level, 3);
    }
}
