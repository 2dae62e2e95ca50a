use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quiz_core::model::{
    AnswerRecord, AreaKey, OptionAlias, Question, QuestionId, SessionId, SessionMode,
    SessionSnapshot, SessionState, SnapshotAnswer, Tier, UserId, percentage,
};
use quiz_core::time::Clock;
use quiz_core::xp::{XpAward, session_xp};
use storage::question_bank::QuestionSource;
use storage::repository::StorageError;

use super::plan::{QuestionPlanner, SessionPlan};
use super::progress::{SessionProgress, format_elapsed};
use super::snapshot::SnapshotStore;
use super::stopwatch::Stopwatch;
use super::ticker::Ticker;
use crate::error::SessionError;
use crate::progress_service::ProgressLedgerService;
use crate::settings::QuizSettings;
use crate::trial_service::TrialQuotaService;

/// Collaborators a session reads from and reports to.
#[derive(Clone)]
pub struct SessionDeps {
    pub questions: Arc<dyn QuestionSource>,
    pub trials: TrialQuotaService,
    pub progress: ProgressLedgerService,
    pub snapshots: SnapshotStore,
}

/// What the user asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizConfig {
    pub mode: SessionMode,
    pub tier: Tier,
}

impl QuizConfig {
    #[must_use]
    pub fn new(mode: SessionMode, tier: Tier) -> Self {
        Self { mode, tier }
    }
}

/// Result of submitting an answer; the explanation becomes visible here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub question_id: QuestionId,
    pub chosen: OptionAlias,
    pub correct_alias: OptionAlias,
    pub is_correct: bool,
    pub explanation: String,
}

/// Final figures of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub score: u32,
    pub correct: u32,
    pub total: u32,
    pub elapsed_secs: u64,
    pub xp: XpAward,
    /// True when this session consumed a daily attempt.
    pub attempt_registered: bool,
}

/// What `advance` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next { index: usize },
    Completed(SessionOutcome),
}

/// How far the user got before leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbandonReport {
    pub answered: usize,
    pub total: usize,
}

/// Side effects of completion that already succeeded.
#[derive(Debug, Default)]
struct CompletionLog {
    outcome: Option<SessionOutcome>,
    attempt_done: bool,
    progress_done: bool,
    xp_done: bool,
    snapshot_cleared: bool,
}

impl CompletionLog {
    fn is_recorded(&self) -> bool {
        self.attempt_done && self.progress_done && self.xp_done && self.snapshot_cleared
    }
}

/// One quiz run, from admission to completion or abandonment.
///
/// The engine is owned by a single caller; every transition takes `&mut self`.
/// Elapsed time is derived from the clock, the background ticker only
/// publishes it to subscribers.
pub struct QuizSessionEngine {
    id: SessionId,
    user: UserId,
    config: QuizConfig,
    settings: QuizSettings,
    clock: Clock,
    deps: SessionDeps,

    state: SessionState,
    blocked: bool,
    remaining_attempts: Option<u32>,
    last_error: Option<String>,

    pool: Vec<Question>,
    questions: Vec<Question>,
    cursor: usize,
    selected: Option<OptionAlias>,
    answers: Vec<SnapshotAnswer>,
    correct_count: u32,
    question_shown_at: Option<DateTime<Utc>>,
    last_feedback: Option<AnswerFeedback>,

    stopwatch: Stopwatch,
    ticker: Option<Ticker>,
    elapsed_tx: Arc<watch::Sender<u64>>,
    cancel: CancellationToken,
    completion: CompletionLog,
}

impl QuizSessionEngine {
    #[must_use]
    pub fn new(
        user: UserId,
        config: QuizConfig,
        settings: QuizSettings,
        clock: Clock,
        deps: SessionDeps,
    ) -> Self {
        let (elapsed_tx, _) = watch::channel(0);
        Self {
            id: SessionId::generate(),
            user,
            config,
            settings,
            clock,
            deps,
            state: SessionState::Initializing,
            blocked: false,
            remaining_attempts: None,
            last_error: None,
            pool: Vec::new(),
            questions: Vec::new(),
            cursor: 0,
            selected: None,
            answers: Vec::new(),
            correct_count: 0,
            question_shown_at: None,
            last_feedback: None,
            stopwatch: Stopwatch::default(),
            ticker: None,
            elapsed_tx: Arc::new(elapsed_tx),
            cancel: CancellationToken::new(),
            completion: CompletionLog::default(),
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            state: self.state,
        }
    }

    fn require(&self, action: &'static str, state: SessionState) -> Result<(), SessionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        warn!(session = %self.id, error = %err, "session entered error state");
        self.state = SessionState::Error;
        self.last_error = Some(err.to_string());
        err
    }

    //
    // ─── ADMISSION & LOADING ───────────────────────────────────────────────────
    //

    /// Validate the mode and run the daily admission check.
    ///
    /// A free-tier user with no attempts left lands in `Ready` with
    /// [`is_blocked`](Self::is_blocked) set; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Mode` for an invalid mode (state unchanged), or
    /// `SessionError::Trial` when the quota cannot be read (state `Error`).
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        self.require("initialize", SessionState::Initializing)?;
        self.config.mode.validate()?;

        let gated_area = match (self.config.tier, self.config.mode.quota_area()) {
            (Tier::Free, Some(area)) => Some(area.clone()),
            _ => None,
        };

        if let Some(area) = gated_area {
            let remaining = match self.deps.trials.get_remaining(&self.user, &area).await {
                Ok(remaining) => remaining,
                Err(err) => return Err(self.fail(err.into())),
            };
            self.remaining_attempts = Some(remaining);
            if remaining == 0 {
                info!(session = %self.id, user = %self.user, area = %area, "session blocked by daily quota");
                self.blocked = true;
                self.state = SessionState::Ready;
                return Ok(());
            }
        }

        self.state = SessionState::Loading;
        Ok(())
    }

    async fn plan(&self) -> Result<SessionPlan, SessionError> {
        let outcomes = match &self.config.mode {
            SessionMode::Smart { area } => {
                self.deps.progress.area_outcomes(&self.user, area).await?
            }
            _ => HashMap::new(),
        };
        let planner = QuestionPlanner::new(self.settings.question_limit(self.config.tier))
            .with_shuffle(self.settings.shuffle());
        let pool = planner
            .gather(&self.config.mode, self.deps.questions.as_ref())
            .await?;
        Ok(planner.select(&self.config.mode, pool, &outcomes))
    }

    /// Fetch and order the questions for this run.
    ///
    /// Cancelling the token from [`cancel_handle`](Self::cancel_handle)
    /// while this runs discards the result and abandons the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoQuestions` or `SessionError::SourceUnavailable`
    /// (state `Error`), or `SessionError::Cancelled` (state `Abandoned`).
    pub async fn load_questions(&mut self) -> Result<(), SessionError> {
        self.require("load questions", SessionState::Loading)?;

        let token = self.cancel.clone();
        let planned = if token.is_cancelled() {
            None
        } else {
            let plan = self.plan();
            tokio::select! {
                biased;
                () = token.cancelled() => None,
                result = plan => Some(result),
            }
        };

        match planned {
            None => {
                info!(session = %self.id, "session load cancelled");
                self.state = SessionState::Abandoned;
                Err(SessionError::Cancelled)
            }
            Some(Err(err)) => Err(self.fail(err)),
            Some(Ok(plan)) if plan.is_empty() => Err(self.fail(SessionError::NoQuestions)),
            Some(Ok(plan)) => {
                debug!(
                    session = %self.id,
                    mode = %self.config.mode.kind(),
                    selected = plan.questions.len(),
                    available = plan.pool.len(),
                    "session questions loaded"
                );
                self.pool = plan.pool;
                self.questions = plan.questions;
                self.last_error = None;
                self.state = SessionState::Ready;
                Ok(())
            }
        }
    }

    /// Leave `Error` and run admission and loading again.
    ///
    /// # Errors
    ///
    /// Same as [`initialize`](Self::initialize) and
    /// [`load_questions`](Self::load_questions).
    pub async fn reload(&mut self) -> Result<(), SessionError> {
        self.require("reload", SessionState::Error)?;
        info!(session = %self.id, "reloading session");
        self.state = SessionState::Initializing;
        self.blocked = false;
        self.remaining_attempts = None;
        self.initialize().await?;
        if self.state == SessionState::Loading {
            self.load_questions().await?;
        }
        Ok(())
    }

    /// Show the first question and start the clock.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AdmissionDenied` for a blocked session, or
    /// `SessionError::InvalidTransition` outside `Ready`.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.require("start", SessionState::Ready)?;
        if let (true, Some(area)) = (self.blocked, self.config.mode.quota_area()) {
            return Err(SessionError::AdmissionDenied { area: area.clone() });
        }

        let now = self.clock.now();
        self.state = SessionState::InProgress;
        self.question_shown_at = Some(now);
        self.stopwatch.start(now);
        self.spawn_ticker();
        info!(session = %self.id, total = self.questions.len(), "session started");
        Ok(())
    }

    //
    // ─── ANSWERING ─────────────────────────────────────────────────────────────
    //

    fn current_answered(&self) -> bool {
        self.questions
            .get(self.cursor)
            .is_some_and(|q| self.answers.iter().any(|a| &a.question_id == q.id()))
    }

    /// Remember a candidate answer; re-selecting overwrites it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` outside `InProgress`, for an answered question,
    /// or for an alias the question does not offer.
    pub fn select_answer(&mut self, alias: OptionAlias) -> Result<(), SessionError> {
        self.require("select an answer", SessionState::InProgress)?;
        if self.current_answered() {
            return Err(SessionError::AlreadyAnswered);
        }
        let question = self
            .questions
            .get(self.cursor)
            .ok_or_else(|| self.invalid("select an answer"))?;
        if !question.has_option(alias) {
            return Err(SessionError::UnknownOption(alias));
        }
        self.selected = Some(alias);
        Ok(())
    }

    /// Grade the selected answer for the current question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NothingSelected`, `SessionError::AlreadyAnswered`,
    /// or `SessionError::InvalidTransition` outside `InProgress`.
    pub fn submit_answer(&mut self) -> Result<AnswerFeedback, SessionError> {
        self.require("submit an answer", SessionState::InProgress)?;
        if self.current_answered() {
            return Err(SessionError::AlreadyAnswered);
        }
        let question = self
            .questions
            .get(self.cursor)
            .ok_or_else(|| self.invalid("submit an answer"))?;
        let chosen = self.selected.ok_or(SessionError::NothingSelected)?;

        let now = self.clock.now();
        let shown_at = self.question_shown_at.unwrap_or(now);
        let spent = now.signed_duration_since(shown_at).num_seconds().max(0);
        let is_correct = question.is_correct(chosen);

        let feedback = AnswerFeedback {
            question_id: question.id().clone(),
            chosen,
            correct_alias: question.correct(),
            is_correct,
            explanation: question.explanation().to_owned(),
        };

        self.answers.push(SnapshotAnswer {
            question_id: question.id().clone(),
            chosen,
            correct: is_correct,
            time_spent_secs: u32::try_from(spent).unwrap_or(u32::MAX),
            answered_at: now,
        });
        if is_correct {
            self.correct_count += 1;
        }
        self.selected = None;
        self.last_feedback = Some(feedback.clone());
        Ok(feedback)
    }

    /// Move to the next question, submitting the current selection first if
    /// needed; moving past the last question completes the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NothingSelected` when there is nothing to
    /// submit, or whatever [`complete`](Self::complete) returns.
    pub async fn advance(&mut self) -> Result<Advance, SessionError> {
        self.require("advance", SessionState::InProgress)?;
        if !self.current_answered() {
            self.submit_answer()?;
        }

        self.cursor += 1;
        self.selected = None;
        if self.cursor >= self.questions.len() {
            self.cursor = self.questions.len();
            return self.complete().await.map(Advance::Completed);
        }

        self.question_shown_at = Some(self.clock.now());
        Ok(Advance::Next { index: self.cursor })
    }

    //
    // ─── PAUSE ─────────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` outside `InProgress`.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.require("pause", SessionState::InProgress)?;
        self.stop_clock();
        self.state = SessionState::Paused;
        debug!(session = %self.id, elapsed = self.elapsed_secs(), "session paused");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` outside `Paused`.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.require("resume", SessionState::Paused)?;
        self.stopwatch.start(self.clock.now());
        self.spawn_ticker();
        self.state = SessionState::InProgress;
        debug!(session = %self.id, "session resumed");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless in progress or paused.
    pub fn toggle_pause(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Paused => self.resume(),
            _ => self.pause(),
        }
    }

    //
    // ─── TERMINAL TRANSITIONS ──────────────────────────────────────────────────
    //

    /// Finish the session and record it exactly once.
    ///
    /// Calling again returns the same outcome; side effects that failed
    /// earlier are retried, ones that succeeded are not repeated.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless the session is active
    /// or completed, or a storage error. The session stays `Completed` when
    /// recording fails.
    pub async fn complete(&mut self) -> Result<SessionOutcome, SessionError> {
        match self.state {
            SessionState::InProgress | SessionState::Paused => self.finish(),
            SessionState::Completed => {}
            _ => return Err(self.invalid("complete")),
        }
        self.record_completion().await
    }

    fn finish(&mut self) {
        self.stop_clock();
        self.state = SessionState::Completed;

        let total = u32::try_from(self.questions.len()).unwrap_or(u32::MAX);
        let elapsed_secs = self.stopwatch.elapsed_secs(self.clock.now());
        let outcome = SessionOutcome {
            session_id: self.id,
            score: percentage(u64::from(self.correct_count), u64::from(total)),
            correct: self.correct_count,
            total,
            elapsed_secs,
            xp: session_xp(self.correct_count, total, elapsed_secs),
            attempt_registered: false,
        };
        info!(
            session = %self.id,
            score = outcome.score,
            correct = outcome.correct,
            total = outcome.total,
            elapsed = outcome.elapsed_secs,
            xp = outcome.xp.total(),
            "session completed"
        );
        self.completion.outcome = Some(outcome);
    }

    fn answer_records(&self) -> Vec<AnswerRecord> {
        self.answers
            .iter()
            .filter_map(|answer| {
                let question = self.questions.iter().find(|q| q.id() == &answer.question_id)?;
                Some(
                    AnswerRecord::new(
                        question.area().clone(),
                        answer.question_id.clone(),
                        answer.correct,
                        answer.time_spent_secs,
                        answer.answered_at,
                    )
                    .with_subarea(question.subject().cloned()),
                )
            })
            .collect()
    }

    async fn record_completion(&mut self) -> Result<SessionOutcome, SessionError> {
        let Some(mut outcome) = self.completion.outcome.clone() else {
            return Err(self.invalid("complete"));
        };
        if self.completion.is_recorded() {
            return Ok(outcome);
        }

        if !self.completion.attempt_done {
            if let (Tier::Free, Some(area)) = (self.config.tier, self.config.mode.quota_area()) {
                outcome.attempt_registered =
                    self.deps.trials.register_attempt(&self.user, area).await?;
            }
            self.completion.attempt_done = true;
            self.completion.outcome = Some(outcome.clone());
        }

        if !self.completion.progress_done {
            let records = self.answer_records();
            self.deps.progress.append_batch(&self.user, &records).await?;
            self.completion.progress_done = true;
        }

        if !self.completion.xp_done {
            self.deps
                .progress
                .award_xp(&self.user, self.config.mode.area(), outcome.xp.total())
                .await?;
            self.completion.xp_done = true;
        }

        if !self.completion.snapshot_cleared {
            self.deps.snapshots.clear(&self.user).await?;
            self.completion.snapshot_cleared = true;
        }

        Ok(outcome)
    }

    /// Leave without finishing. Nothing is charged or recorded.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless in progress or paused.
    pub fn abandon(&mut self) -> Result<AbandonReport, SessionError> {
        if !self.state.is_active() {
            return Err(self.invalid("abandon"));
        }
        self.stop_clock();
        self.state = SessionState::Abandoned;
        let report = AbandonReport {
            answered: self.answers.len(),
            total: self.questions.len(),
        };
        info!(
            session = %self.id,
            answered = report.answered,
            total = report.total,
            "session abandoned"
        );
        Ok(report)
    }

    //
    // ─── SNAPSHOTS ─────────────────────────────────────────────────────────────
    //

    /// Persist the in-flight state so a later session can pick it up.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless in progress or paused,
    /// or `SessionError::Storage` if the snapshot cannot be written.
    pub async fn save_snapshot(&self) -> Result<(), SessionError> {
        if !self.state.is_active() {
            return Err(self.invalid("save"));
        }
        let snapshot = SessionSnapshot {
            scope: self.config.mode.scope(),
            question_ids: self.questions.iter().map(|q| q.id().clone()).collect(),
            cursor: self.cursor,
            elapsed_secs: self.elapsed_secs(),
            correct_count: self.correct_count,
            answers: self.answers.clone(),
            saved_at: self.clock.now(),
        };
        self.deps.snapshots.save(&self.user, &snapshot).await?;
        debug!(session = %self.id, cursor = self.cursor, "session snapshot saved");
        Ok(())
    }

    /// Resume from the user's saved snapshot when it fits this session.
    ///
    /// Returns `false` and leaves the fresh run untouched when there is no
    /// snapshot, or it is expired, for another mode/area/subject, or refers
    /// to questions that are no longer available.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` outside an unblocked `Ready`,
    /// or `SessionError::Storage` if the store cannot be read.
    pub async fn restore_snapshot(&mut self) -> Result<bool, SessionError> {
        self.require("restore", SessionState::Ready)?;
        if self.blocked {
            return Err(self.invalid("restore"));
        }

        let snapshot = match self.deps.snapshots.load(&self.user).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(false),
            Err(StorageError::Serialization(reason)) => {
                debug!(session = %self.id, %reason, "ignoring unreadable snapshot");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        let now = self.clock.now();
        if !snapshot.matches(&self.config.mode.scope())
            || !snapshot.is_fresh(now, self.settings.snapshot_ttl())
            || snapshot.cursor >= snapshot.question_ids.len()
        {
            debug!(session = %self.id, saved_at = %snapshot.saved_at, "ignoring stale snapshot");
            return Ok(false);
        }

        let Some(questions) = snapshot
            .question_ids
            .iter()
            .map(|id| self.pool.iter().find(|q| q.id() == id).cloned())
            .collect::<Option<Vec<_>>>()
        else {
            debug!(session = %self.id, "snapshot refers to unknown questions");
            return Ok(false);
        };

        self.questions = questions;
        self.cursor = snapshot.cursor;
        self.correct_count = snapshot.correct_count;
        self.answers = snapshot.answers;
        self.stopwatch = Stopwatch::with_elapsed_secs(snapshot.elapsed_secs);
        self.elapsed_tx.send_replace(snapshot.elapsed_secs);
        info!(
            session = %self.id,
            cursor = self.cursor,
            elapsed = snapshot.elapsed_secs,
            "session restored from snapshot"
        );
        Ok(true)
    }

    //
    // ─── CLOCK ─────────────────────────────────────────────────────────────────
    //

    fn spawn_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.ticker = Ticker::spawn(self.stopwatch, self.clock.clone(), Arc::clone(&self.elapsed_tx));
    }

    fn stop_clock(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        let now = self.clock.now();
        self.stopwatch.pause(now);
        self.elapsed_tx.send_replace(self.stopwatch.elapsed_secs(now));
    }

    //
    // ─── GETTERS ───────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    #[must_use]
    pub fn config(&self) -> &QuizConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True when the daily quota denied this session.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    #[must_use]
    pub fn can_start(&self) -> bool {
        self.state == SessionState::Ready && !self.blocked
    }

    /// Attempts left today as seen by the admission check; `None` when not gated.
    #[must_use]
    pub fn remaining_attempts(&self) -> Option<u32> {
        self.remaining_attempts
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        match self.state {
            SessionState::Ready | SessionState::InProgress | SessionState::Paused => {
                self.questions.get(self.cursor)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn selected(&self) -> Option<OptionAlias> {
        self.selected
    }

    #[must_use]
    pub fn is_current_answered(&self) -> bool {
        self.current_answered()
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress::new(
            self.questions.len(),
            self.answers.len(),
            self.cursor,
            self.state == SessionState::Completed,
        )
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        self.stopwatch.elapsed_secs(self.clock.now())
    }

    /// Elapsed time as `mm:ss`.
    #[must_use]
    pub fn formatted_time(&self) -> String {
        format_elapsed(self.elapsed_secs())
    }

    /// Rounded percentage of correct answers over all questions.
    #[must_use]
    pub fn score(&self) -> u32 {
        let total = u64::try_from(self.questions.len()).unwrap_or(u64::MAX);
        percentage(u64::from(self.correct_count), total)
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    /// Answers in the order they were given.
    #[must_use]
    pub fn answers(&self) -> &[SnapshotAnswer] {
        &self.answers
    }

    #[must_use]
    pub fn last_feedback(&self) -> Option<&AnswerFeedback> {
        self.last_feedback.as_ref()
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.completion.outcome.as_ref()
    }

    /// Area used for quota and XP, if the mode has one.
    #[must_use]
    pub fn area(&self) -> Option<&AreaKey> {
        self.config.mode.area()
    }

    /// Receives the elapsed seconds roughly once a second while running.
    #[must_use]
    pub fn subscribe_elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed_tx.subscribe()
    }

    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Token that aborts an in-flight `load_questions`.
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for QuizSessionEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use quiz_core::ManualClock;
    use quiz_core::model::{AreaKey, QuestionId, SubjectKey};
    use quiz_core::time::fixed_now;
    use std::sync::atomic::{AtomicBool, Ordering};
    use storage::question_bank::InMemoryQuestionBank;
    use storage::repository::{InMemoryStore, KeyValueStore};

    /// Bank that reports a dropped connection until switched back on.
    struct OutageBank {
        inner: InMemoryQuestionBank,
        online: AtomicBool,
    }

    #[async_trait]
    impl QuestionSource for OutageBank {
        async fn fetch(
            &self,
            area: &AreaKey,
            subject: Option<&SubjectKey>,
        ) -> Result<Vec<Question>, StorageError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(StorageError::Connection("down".into()));
            }
            self.inner.fetch(area, subject).await
        }

        async fn areas(&self) -> Result<Vec<AreaKey>, StorageError> {
            self.inner.areas().await
        }
    }

    /// Bank whose fetch never finishes in test time.
    struct StalledBank;

    #[async_trait]
    impl QuestionSource for StalledBank {
        async fn fetch(
            &self,
            _area: &AreaKey,
            _subject: Option<&SubjectKey>,
        ) -> Result<Vec<Question>, StorageError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn areas(&self) -> Result<Vec<AreaKey>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn question(id: &str) -> Question {
        Question::new(
            QuestionId::new(id),
            AreaKey::new("matematica"),
            format!("prompt {id}"),
            &["uno", "due", "tre"],
            OptionAlias::new('B').unwrap(),
        )
        .unwrap()
        .with_explanation(format!("because {id}"))
    }

    struct Fixture {
        manual: ManualClock,
        deps: SessionDeps,
        settings: QuizSettings,
    }

    fn fixture(count: usize) -> Fixture {
        let manual = ManualClock::new(fixed_now());
        let clock = Clock::from(manual.clone());
        let settings = QuizSettings::default().with_shuffle(false);
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let bank = InMemoryQuestionBank::with_questions(
            (1..=count).map(|n| question(&format!("q{n}"))).collect(),
        );
        let deps = SessionDeps {
            questions: Arc::new(bank),
            trials: TrialQuotaService::new(clock.clone(), Arc::clone(&kv), &settings),
            progress: ProgressLedgerService::new(clock, Arc::clone(&kv), &settings),
            snapshots: SnapshotStore::new(kv),
        };
        Fixture {
            manual,
            deps,
            settings,
        }
    }

    fn engine(fx: &Fixture, mode: SessionMode) -> QuizSessionEngine {
        QuizSessionEngine::new(
            UserId::new("ana"),
            QuizConfig::new(mode, Tier::Free),
            fx.settings.clone(),
            Clock::from(fx.manual.clone()),
            fx.deps.clone(),
        )
    }

    fn by_area() -> SessionMode {
        SessionMode::ByArea {
            area: AreaKey::new("matematica"),
        }
    }

    async fn started(fx: &Fixture) -> QuizSessionEngine {
        let mut engine = engine(fx, by_area());
        engine.initialize().await.unwrap();
        engine.load_questions().await.unwrap();
        engine.start().unwrap();
        engine
    }

    fn b() -> OptionAlias {
        OptionAlias::new('B').unwrap()
    }

    #[tokio::test]
    async fn lifecycle_reaches_ready_then_in_progress() {
        let fx = fixture(3);
        let mut engine = engine(&fx, by_area());
        assert_eq!(engine.state(), SessionState::Initializing);
        engine.initialize().await.unwrap();
        assert_eq!(engine.state(), SessionState::Loading);
        assert_eq!(engine.remaining_attempts(), Some(3));
        engine.load_questions().await.unwrap();
        assert_eq!(engine.state(), SessionState::Ready);
        assert!(engine.can_start());
        engine.start().unwrap();
        assert_eq!(engine.state(), SessionState::InProgress);
        assert_eq!(engine.current_question().unwrap().id().as_str(), "q1");
        assert!(engine.is_ticking());
    }

    #[tokio::test]
    async fn submit_requires_selection_and_happens_once() {
        let fx = fixture(2);
        let mut engine = started(&fx).await;
        assert!(matches!(
            engine.submit_answer(),
            Err(SessionError::NothingSelected)
        ));
        engine.select_answer(OptionAlias::new('A').unwrap()).unwrap();
        engine.select_answer(b()).unwrap();
        let feedback = engine.submit_answer().unwrap();
        assert!(feedback.is_correct);
        assert_eq!(feedback.explanation, "because q1");
        assert!(matches!(
            engine.submit_answer(),
            Err(SessionError::AlreadyAnswered)
        ));
        assert!(matches!(
            engine.select_answer(b()),
            Err(SessionError::AlreadyAnswered)
        ));
        assert_eq!(engine.correct_count(), 1);
    }

    #[tokio::test]
    async fn unknown_option_is_rejected() {
        let fx = fixture(1);
        let mut engine = started(&fx).await;
        let err = engine.select_answer(OptionAlias::new('E').unwrap());
        assert!(matches!(err, Err(SessionError::UnknownOption(_))));
        assert_eq!(engine.selected(), None);
    }

    #[tokio::test]
    async fn advance_submits_implicitly_and_completes_at_end() {
        let fx = fixture(2);
        let mut engine = started(&fx).await;
        engine.select_answer(b()).unwrap();
        assert_eq!(engine.advance().await.unwrap(), Advance::Next { index: 1 });
        engine.select_answer(OptionAlias::new('C').unwrap()).unwrap();
        let Advance::Completed(outcome) = engine.advance().await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(outcome.correct, 1);
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.score, 50);
        assert_eq!(engine.score(), 50);
        assert!(outcome.attempt_registered);
        assert_eq!(engine.state(), SessionState::Completed);
        assert!(!engine.is_ticking());
        assert!(engine.progress().is_complete);
    }

    #[tokio::test]
    async fn advance_without_selection_is_rejected() {
        let fx = fixture(2);
        let mut engine = started(&fx).await;
        assert!(matches!(
            engine.advance().await,
            Err(SessionError::NothingSelected)
        ));
        assert_eq!(engine.current_index(), 0);
    }

    #[tokio::test]
    async fn pause_excludes_paused_interval() {
        let fx = fixture(2);
        let mut engine = started(&fx).await;
        fx.manual.advance(Duration::seconds(30));
        engine.pause().unwrap();
        assert!(!engine.is_ticking());
        fx.manual.advance(Duration::minutes(10));
        assert_eq!(engine.elapsed_secs(), 30);
        assert!(matches!(
            engine.select_answer(b()),
            Err(SessionError::InvalidTransition { .. })
        ));
        engine.toggle_pause().unwrap();
        fx.manual.advance(Duration::seconds(15));
        assert_eq!(engine.elapsed_secs(), 45);
        assert_eq!(engine.formatted_time(), "00:45");
    }

    #[tokio::test]
    async fn complete_twice_records_once() {
        let fx = fixture(1);
        let mut engine = started(&fx).await;
        engine.select_answer(b()).unwrap();
        engine.submit_answer().unwrap();
        let first = engine.complete().await.unwrap();
        let second = engine.complete().await.unwrap();
        assert_eq!(first, second);

        let user = UserId::new("ana");
        let area = AreaKey::new("matematica");
        assert_eq!(fx.deps.trials.get_remaining(&user, &area).await.unwrap(), 2);
        assert_eq!(fx.deps.progress.records(&user).await.unwrap().len(), 1);
        assert_eq!(fx.deps.progress.levels(&user).await.unwrap().total_xp, 80);
    }

    #[tokio::test]
    async fn abandon_records_nothing() {
        let fx = fixture(3);
        let mut engine = started(&fx).await;
        engine.select_answer(b()).unwrap();
        engine.advance().await.unwrap();
        let report = engine.abandon().unwrap();
        assert_eq!(report, AbandonReport { answered: 1, total: 3 });
        assert_eq!(engine.state(), SessionState::Abandoned);
        assert!(engine.complete().await.is_err());

        let user = UserId::new("ana");
        let area = AreaKey::new("matematica");
        assert_eq!(fx.deps.trials.get_remaining(&user, &area).await.unwrap(), 3);
        assert!(fx.deps.progress.records(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_quota_blocks_without_error() {
        let fx = fixture(2);
        let user = UserId::new("ana");
        let area = AreaKey::new("matematica");
        for _ in 0..3 {
            fx.deps.trials.register_attempt(&user, &area).await.unwrap();
        }
        let mut engine = engine(&fx, by_area());
        engine.initialize().await.unwrap();
        assert_eq!(engine.state(), SessionState::Ready);
        assert!(engine.is_blocked());
        assert!(!engine.can_start());
        assert!(matches!(
            engine.start(),
            Err(SessionError::AdmissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn mixed_mode_ignores_quota() {
        let fx = fixture(2);
        let user = UserId::new("ana");
        let area = AreaKey::new("matematica");
        for _ in 0..3 {
            fx.deps.trials.register_attempt(&user, &area).await.unwrap();
        }
        let mut engine = engine(&fx, SessionMode::Mixed { areas: vec![] });
        engine.initialize().await.unwrap();
        assert_eq!(engine.remaining_attempts(), None);
        engine.load_questions().await.unwrap();
        assert!(engine.can_start());
    }

    #[tokio::test]
    async fn empty_source_is_an_error_and_reload_retries() {
        let fx = fixture(2);
        let mut engine = engine(
            &fx,
            SessionMode::ByArea {
                area: AreaKey::new("storia"),
            },
        );
        engine.initialize().await.unwrap();
        assert!(matches!(
            engine.load_questions().await,
            Err(SessionError::NoQuestions)
        ));
        assert_eq!(engine.state(), SessionState::Error);
        assert!(engine.last_error().is_some());
        assert!(engine.reload().await.is_err());
        assert_eq!(engine.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn cancelled_load_abandons() {
        let fx = fixture(2);
        let mut engine = engine(&fx, by_area());
        engine.initialize().await.unwrap();
        engine.cancel_handle().cancel();
        assert!(matches!(
            engine.load_questions().await,
            Err(SessionError::Cancelled)
        ));
        assert_eq!(engine.state(), SessionState::Abandoned);
    }

    #[tokio::test]
    async fn source_outage_recovers_on_reload() {
        let mut fx = fixture(0);
        let bank = Arc::new(OutageBank {
            inner: InMemoryQuestionBank::with_questions(vec![question("q1"), question("q2")]),
            online: AtomicBool::new(false),
        });
        fx.deps.questions = bank.clone();

        let mut engine = engine(&fx, by_area());
        engine.initialize().await.unwrap();
        let err = engine.load_questions().await.unwrap_err();
        assert!(matches!(err, SessionError::SourceUnavailable(_)));
        assert_eq!(engine.state(), SessionState::Error);
        assert!(engine.last_error().is_some());

        bank.online.store(true, Ordering::SeqCst);
        engine.reload().await.unwrap();
        assert_eq!(engine.state(), SessionState::Ready);
        assert_eq!(engine.questions().len(), 2);
        engine.start().unwrap();
        assert_eq!(engine.state(), SessionState::InProgress);
    }

    #[tokio::test]
    async fn cancel_during_fetch_discards_the_load() {
        let mut fx = fixture(0);
        fx.deps.questions = Arc::new(StalledBank);

        let mut engine = engine(&fx, by_area());
        engine.initialize().await.unwrap();
        let handle = engine.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            handle.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            engine.load_questions(),
        )
        .await
        .expect("load should stop once cancelled");
        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert_eq!(engine.state(), SessionState::Abandoned);
        assert!(engine.questions().is_empty());

        let user = UserId::new("ana");
        let area = AreaKey::new("matematica");
        assert_eq!(fx.deps.trials.get_remaining(&user, &area).await.unwrap(), 3);
        assert!(fx.deps.progress.records(&user).await.unwrap().is_empty());
        assert_eq!(fx.deps.progress.levels(&user).await.unwrap().total_xp, 0);
    }

    #[tokio::test]
    async fn single_question_runs_the_full_state_machine() {
        let fx = fixture(4);
        let mut engine = engine(
            &fx,
            SessionMode::SingleQuestion {
                area: AreaKey::new("matematica"),
                question: QuestionId::new("q3"),
            },
        );
        engine.initialize().await.unwrap();
        engine.load_questions().await.unwrap();
        assert_eq!(engine.questions().len(), 1);
        engine.start().unwrap();
        engine.select_answer(b()).unwrap();
        let Advance::Completed(outcome) = engine.advance().await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(outcome.score, 100);
        assert!(!outcome.attempt_registered);
    }

    #[tokio::test]
    async fn snapshot_round_trip_restores_position() {
        let fx = fixture(4);
        let mut first = started(&fx).await;
        first.select_answer(b()).unwrap();
        fx.manual.advance(Duration::seconds(40));
        first.advance().await.unwrap();
        first.save_snapshot().await.unwrap();
        first.abandon().unwrap();

        fx.manual.advance(Duration::hours(1));
        let mut second = engine(&fx, by_area());
        second.initialize().await.unwrap();
        second.load_questions().await.unwrap();
        assert!(second.restore_snapshot().await.unwrap());
        assert_eq!(second.current_index(), 1);
        assert_eq!(second.correct_count(), 1);
        assert_eq!(second.elapsed_secs(), 40);
        second.start().unwrap();
        assert_eq!(second.current_question().unwrap().id().as_str(), "q2");
    }
}
