//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{AreaKey, OptionAlias, SessionModeError, SessionState};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted when building `QuizSettings`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("max attempts per area must be > 0")]
    InvalidMaxAttempts,
    #[error("question limits must be > 0")]
    InvalidQuestionLimit,
    #[error("snapshot TTL must be positive")]
    InvalidSnapshotTtl,
}

/// Errors emitted by `TrialQuotaService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrialError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ProgressLedgerService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the quiz session engine.
///
/// Transition errors leave the session unchanged; their text doubles as the
/// hint shown to the user.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("cannot {action} while the session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },
    #[error("select an answer first")]
    NothingSelected,
    #[error("this question has already been answered")]
    AlreadyAnswered,
    #[error("option {0} does not exist for this question")]
    UnknownOption(OptionAlias),
    #[error("no attempts left today for {area}")]
    AdmissionDenied { area: AreaKey },
    #[error("questions unavailable: {0}")]
    SourceUnavailable(String),
    #[error("no questions matched this session")]
    NoQuestions,
    #[error("session load was cancelled")]
    Cancelled,
    #[error(transparent)]
    Mode(#[from] SessionModeError),
    #[error(transparent)]
    Trial(#[from] TrialError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
