use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::model::ids::{AreaKey, QuestionId, SubjectKey};
use crate::model::question::OptionAlias;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionModeError {
    #[error("favorites mode needs at least one favorite question")]
    EmptyFavorites,

    #[error("custom question limit must be > 0")]
    InvalidCustomLimit,
}

//
// ─── TIER ──────────────────────────────────────────────────────────────────────
//

/// Subscription tier of the user taking the quiz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    #[must_use]
    pub fn is_free(self) -> bool {
        matches!(self, Tier::Free)
    }
}

//
// ─── MODE ──────────────────────────────────────────────────────────────────────
//

/// How the questions of a session are selected.
///
/// Each variant carries only the targeting fields that make sense for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SessionMode {
    ByArea {
        area: AreaKey,
    },
    BySubject {
        area: AreaKey,
        subject: SubjectKey,
    },
    /// Union of the given areas; every known area when empty.
    Mixed {
        #[serde(default)]
        areas: Vec<AreaKey>,
    },
    Favorites {
        favorites: BTreeSet<QuestionId>,
        #[serde(default)]
        areas: Vec<AreaKey>,
    },
    SingleQuestion {
        area: AreaKey,
        question: QuestionId,
    },
    /// Previously missed questions first, then unseen, then mastered.
    Smart {
        area: AreaKey,
    },
    Custom {
        area: AreaKey,
        #[serde(default)]
        subjects: Vec<SubjectKey>,
        #[serde(default)]
        limit: Option<usize>,
    },
}

/// Discriminant of [`SessionMode`], used to match saved snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    ByArea,
    BySubject,
    Mixed,
    Favorites,
    SingleQuestion,
    Smart,
    Custom,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModeKind::ByArea => "by_area",
            ModeKind::BySubject => "by_subject",
            ModeKind::Mixed => "mixed",
            ModeKind::Favorites => "favorites",
            ModeKind::SingleQuestion => "single_question",
            ModeKind::Smart => "smart",
            ModeKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl SessionMode {
    /// Check the mode-specific invariants.
    ///
    /// # Errors
    ///
    /// Returns `SessionModeError` for an empty favorites set or a zero custom limit.
    pub fn validate(&self) -> Result<(), SessionModeError> {
        match self {
            SessionMode::Favorites { favorites, .. } if favorites.is_empty() => {
                Err(SessionModeError::EmptyFavorites)
            }
            SessionMode::Custom { limit: Some(0), .. } => Err(SessionModeError::InvalidCustomLimit),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ModeKind {
        match self {
            SessionMode::ByArea { .. } => ModeKind::ByArea,
            SessionMode::BySubject { .. } => ModeKind::BySubject,
            SessionMode::Mixed { .. } => ModeKind::Mixed,
            SessionMode::Favorites { .. } => ModeKind::Favorites,
            SessionMode::SingleQuestion { .. } => ModeKind::SingleQuestion,
            SessionMode::Smart { .. } => ModeKind::Smart,
            SessionMode::Custom { .. } => ModeKind::Custom,
        }
    }

    /// The single area this mode targets, if any.
    #[must_use]
    pub fn area(&self) -> Option<&AreaKey> {
        match self {
            SessionMode::ByArea { area }
            | SessionMode::BySubject { area, .. }
            | SessionMode::SingleQuestion { area, .. }
            | SessionMode::Smart { area }
            | SessionMode::Custom { area, .. } => Some(area),
            SessionMode::Mixed { .. } | SessionMode::Favorites { .. } => None,
        }
    }

    #[must_use]
    pub fn subject(&self) -> Option<&SubjectKey> {
        match self {
            SessionMode::BySubject { subject, .. } => Some(subject),
            _ => None,
        }
    }

    /// Area whose daily quota gates this mode for free-tier users.
    ///
    /// Mixed, favorites and single-question review are never gated.
    #[must_use]
    pub fn quota_area(&self) -> Option<&AreaKey> {
        match self {
            SessionMode::ByArea { area }
            | SessionMode::BySubject { area, .. }
            | SessionMode::Smart { area }
            | SessionMode::Custom { area, .. } => Some(area),
            SessionMode::Mixed { .. }
            | SessionMode::Favorites { .. }
            | SessionMode::SingleQuestion { .. } => None,
        }
    }

    #[must_use]
    pub fn scope(&self) -> SnapshotScope {
        SnapshotScope {
            mode: self.kind(),
            area: self.area().cloned(),
            subject: self.subject().cloned(),
        }
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Lifecycle state of a quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Loading,
    Ready,
    InProgress,
    Paused,
    Completed,
    Abandoned,
    Error,
}

impl SessionState {
    /// Completed and abandoned sessions never change state again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Abandoned)
    }

    /// True while the user is inside the question loop.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::InProgress | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initializing => "initializing",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::InProgress => "in progress",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Abandoned => "abandoned",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// Identifies which session a snapshot may be restored into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotScope {
    pub mode: ModeKind,
    pub area: Option<AreaKey>,
    pub subject: Option<SubjectKey>,
}

/// One answered question inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotAnswer {
    pub question_id: QuestionId,
    pub chosen: OptionAlias,
    pub correct: bool,
    pub time_spent_secs: u32,
    pub answered_at: DateTime<Utc>,
}

/// Externalized in-flight session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub scope: SnapshotScope,
    /// Question order of the saved run; restore reproduces it.
    pub question_ids: Vec<QuestionId>,
    pub cursor: usize,
    pub elapsed_secs: u64,
    pub correct_count: u32,
    /// In answer order.
    pub answers: Vec<SnapshotAnswer>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// True when the snapshot is younger than `ttl` at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.saved_at) < ttl
    }

    #[must_use]
    pub fn matches(&self, scope: &SnapshotScope) -> bool {
        &self.scope == scope
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
