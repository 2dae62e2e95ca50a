#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod identity;
pub mod progress_service;
pub mod sessions;
pub mod settings;
pub mod trial_service;

pub use quiz_core::Clock;
pub use sessions as session;

pub use app_services::QuizServices;
pub use error::{AppServicesError, ProgressError, SessionError, SettingsError, TrialError};
pub use identity::{IdentityProvider, StaticIdentity, resolve_user};
pub use progress_service::ProgressLedgerService;
pub use settings::QuizSettings;
pub use trial_service::TrialQuotaService;

pub use sessions::{
    AbandonReport, Advance, AnswerFeedback, QuizConfig, QuizSessionEngine, SessionDeps,
    SessionOutcome, SessionProgress, SnapshotStore, format_elapsed,
};
