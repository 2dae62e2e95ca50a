mod answer;
mod ids;
mod progress;
mod question;
mod session;
mod trial;

pub use ids::{AreaKey, ParseIdError, QuestionId, SessionId, SubjectKey, UserId};

pub use answer::AnswerRecord;
pub use progress::{AreaStats, ProgressStats, current_streak, percentage};
pub use question::{AnswerOption, Difficulty, OptionAlias, Question, QuestionDraft, QuestionError};
pub use session::{
    ModeKind, SessionMode, SessionModeError, SessionSnapshot, SessionState, SnapshotAnswer,
    SnapshotScope, Tier,
};
pub use trial::TrialRecord;
