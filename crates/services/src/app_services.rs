use std::sync::Arc;

use quiz_core::model::UserId;
use quiz_core::time::Clock;
use storage::question_bank::QuestionSource;
use storage::repository::{KeyValueStore, Storage};

use crate::error::AppServicesError;
use crate::identity::{IdentityProvider, resolve_user};
use crate::progress_service::ProgressLedgerService;
use crate::sessions::{QuizConfig, QuizSessionEngine, SessionDeps, SnapshotStore};
use crate::settings::QuizSettings;
use crate::trial_service::TrialQuotaService;

/// Assembles the quota, ledger and snapshot services over one storage backend
/// and hands out session engines for the signed-in user.
#[derive(Clone)]
pub struct QuizServices {
    clock: Clock,
    settings: QuizSettings,
    identity: Arc<dyn IdentityProvider>,
    questions: Arc<dyn QuestionSource>,
    trials: TrialQuotaService,
    progress: ProgressLedgerService,
    snapshots: SnapshotStore,
}

impl QuizServices {
    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        clock: Clock,
        settings: QuizSettings,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let kv: &Arc<dyn KeyValueStore> = &storage.kv;
        Self {
            trials: TrialQuotaService::new(clock.clone(), Arc::clone(kv), &settings),
            progress: ProgressLedgerService::new(clock.clone(), Arc::clone(kv), &settings),
            snapshots: SnapshotStore::new(Arc::clone(kv)),
            questions: Arc::clone(&storage.questions),
            clock,
            settings,
            identity,
        }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        settings: QuizSettings,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, settings, identity))
    }

    /// Signed-in user, or the anonymous user when nobody is signed in.
    #[must_use]
    pub fn current_user(&self) -> UserId {
        resolve_user(self.identity.as_ref())
    }

    /// A fresh, uninitialized session for the current user.
    #[must_use]
    pub fn new_session(&self, config: QuizConfig) -> QuizSessionEngine {
        QuizSessionEngine::new(
            self.current_user(),
            config,
            self.settings.clone(),
            self.clock.clone(),
            self.session_deps(),
        )
    }

    #[must_use]
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            questions: Arc::clone(&self.questions),
            trials: self.trials.clone(),
            progress: self.progress.clone(),
            snapshots: self.snapshots.clone(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &QuizSettings {
        &self.settings
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn questions(&self) -> Arc<dyn QuestionSource> {
        Arc::clone(&self.questions)
    }

    #[must_use]
    pub fn trials(&self) -> &TrialQuotaService {
        &self.trials
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressLedgerService {
        &self.progress
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }
}
