mod engine;
mod plan;
mod progress;
mod snapshot;
mod stopwatch;
mod ticker;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use engine::{
    AbandonReport, Advance, AnswerFeedback, QuizConfig, QuizSessionEngine, SessionDeps,
    SessionOutcome,
};
pub use progress::{SessionProgress, format_elapsed};
pub use snapshot::SnapshotStore;
