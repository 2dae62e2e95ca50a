use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::model::ids::{AreaKey, QuestionId, SubjectKey};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question id cannot be empty")]
    EmptyId,

    #[error("question prompt cannot be empty")]
    EmptyPrompt,

    #[error("question {id} needs at least two options, got {count}")]
    TooFewOptions { id: QuestionId, count: usize },

    #[error("question {id} repeats option alias {alias}")]
    DuplicateAlias { id: QuestionId, alias: OptionAlias },

    #[error("question {id} marks {alias} as correct but has no such option")]
    MissingCorrectOption { id: QuestionId, alias: OptionAlias },

    #[error("invalid option alias: {0:?}")]
    InvalidAlias(char),
}

//
// ─── OPTION ALIAS ──────────────────────────────────────────────────────────────
//

/// Single-letter label of an option (`A`, `B`, `C`, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct OptionAlias(char);

impl OptionAlias {
    /// Parses an alias, accepting lowercase input.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::InvalidAlias` for anything but an ASCII letter.
    pub fn new(letter: char) -> Result<Self, QuestionError> {
        if letter.is_ascii_alphabetic() {
            Ok(Self(letter.to_ascii_uppercase()))
        } else {
            Err(QuestionError::InvalidAlias(letter))
        }
    }

    /// Alias for the option at `index` (0 → `A`).
    ///
    /// Returns `None` past `Z`.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        let offset = u8::try_from(index).ok().filter(|i| *i < 26)?;
        Some(Self(char::from(b'A' + offset)))
    }

    #[must_use]
    pub fn letter(self) -> char {
        self.0
    }
}

impl TryFrom<char> for OptionAlias {
    type Error = QuestionError;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OptionAlias> for char {
    fn from(alias: OptionAlias) -> Self {
        alias.0
    }
}

impl fmt::Debug for OptionAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OptionAlias({})", self.0)
    }
}

impl fmt::Display for OptionAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// One selectable answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub alias: OptionAlias,
    pub text: String,
}

/// Unvalidated question as it arrives from a question bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub id: QuestionId,
    pub prompt: String,
    pub options: Vec<AnswerOption>,
    pub correct: OptionAlias,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    pub area: AreaKey,
    #[serde(default)]
    pub subject: Option<SubjectKey>,
    #[serde(default)]
    pub category: Option<String>,
}

impl QuestionDraft {
    /// Validate the draft into an immutable [`Question`].
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the id or prompt is blank, there are fewer
    /// than two options, aliases repeat, or the correct alias is missing.
    pub fn validate(self) -> Result<Question, QuestionError> {
        if self.id.as_str().trim().is_empty() {
            return Err(QuestionError::EmptyId);
        }
        if self.prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        if self.options.len() < 2 {
            return Err(QuestionError::TooFewOptions {
                id: self.id,
                count: self.options.len(),
            });
        }

        let mut seen = HashSet::with_capacity(self.options.len());
        for option in &self.options {
            if !seen.insert(option.alias) {
                return Err(QuestionError::DuplicateAlias {
                    id: self.id,
                    alias: option.alias,
                });
            }
        }
        if !seen.contains(&self.correct) {
            return Err(QuestionError::MissingCorrectOption {
                id: self.id,
                alias: self.correct,
            });
        }

        Ok(Question { draft: self })
    }
}

/// A validated multiple-choice question. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Question {
    draft: QuestionDraft,
}

impl<'de> Deserialize<'de> for Question {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let draft = QuestionDraft::deserialize(deserializer)?;
        draft.validate().map_err(serde::de::Error::custom)
    }
}

impl Question {
    /// Convenience constructor: options are labelled `A`, `B`, ... in order.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` under the same rules as [`QuestionDraft::validate`].
    pub fn new(
        id: QuestionId,
        area: AreaKey,
        prompt: impl Into<String>,
        options: &[&str],
        correct: OptionAlias,
    ) -> Result<Self, QuestionError> {
        let options = options
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let alias = OptionAlias::from_index(index)
                    .ok_or(QuestionError::InvalidAlias(char::REPLACEMENT_CHARACTER))?;
                Ok(AnswerOption {
                    alias,
                    text: (*text).to_owned(),
                })
            })
            .collect::<Result<Vec<_>, QuestionError>>()?;

        QuestionDraft {
            id,
            prompt: prompt.into(),
            options,
            correct,
            explanation: String::new(),
            difficulty: None,
            area,
            subject: None,
            category: None,
        }
        .validate()
    }

    #[must_use]
    pub fn with_subject(mut self, subject: SubjectKey) -> Self {
        self.draft.subject = Some(subject);
        self
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.draft.explanation = explanation.into();
        self
    }

    #[must_use]
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.draft.difficulty = Some(difficulty);
        self
    }

    #[must_use]
    pub fn id(&self) -> &QuestionId {
        &self.draft.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.draft.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[AnswerOption] {
        &self.draft.options
    }

    #[must_use]
    pub fn correct(&self) -> OptionAlias {
        self.draft.correct
    }

    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.draft.explanation
    }

    #[must_use]
    pub fn difficulty(&self) -> Option<Difficulty> {
        self.draft.difficulty
    }

    #[must_use]
    pub fn area(&self) -> &AreaKey {
        &self.draft.area
    }

    #[must_use]
    pub fn subject(&self) -> Option<&SubjectKey> {
        self.draft.subject.as_ref()
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.draft.category.as_deref()
    }

    #[must_use]
    pub fn has_option(&self, alias: OptionAlias) -> bool {
        self.draft.options.iter().any(|o| o.alias == alias)
    }

    #[must_use]
    pub fn is_correct(&self, alias: OptionAlias) -> bool {
        self.draft.correct == alias
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
