use async_trait::async_trait;
use quiz_core::model::{AreaKey, Question, QuestionId, SubjectKey};
use std::sync::{Arc, Mutex};

use crate::repository::StorageError;

/// Read-only lookup of questions by area and optional subject.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Fetch the questions of `area`, narrowed to `subject` when given, in bank order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when the area (or subject) is unknown,
    /// or other storage errors.
    async fn fetch(
        &self,
        area: &AreaKey,
        subject: Option<&SubjectKey>,
    ) -> Result<Vec<Question>, StorageError>;

    /// List every area that has at least one question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn areas(&self) -> Result<Vec<AreaKey>, StorageError>;
}

/// Question bank held in memory, preserving insertion order.
#[derive(Clone, Default)]
pub struct InMemoryQuestionBank {
    questions: Arc<Mutex<Vec<Question>>>,
}

impl InMemoryQuestionBank {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bank from already validated questions.
    #[must_use]
    pub fn with_questions(questions: Vec<Question>) -> Self {
        Self {
            questions: Arc::new(Mutex::new(questions)),
        }
    }

    /// Parse a JSON array of questions; every entry is validated.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` for malformed or invalid questions.
    pub fn from_json_str(json: &str) -> Result<Self, StorageError> {
        let questions: Vec<Question> =
            serde_json::from_str(json).map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Self::with_questions(questions))
    }

    /// Insert or replace a question by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn upsert(&self, question: Question) -> Result<(), StorageError> {
        let mut guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        match guard.iter_mut().find(|q| q.id() == question.id()) {
            Some(slot) => *slot = question,
            None => guard.push(question),
        }
        Ok(())
    }

    /// Snapshot of every question in bank order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn all(&self) -> Result<Vec<Question>, StorageError> {
        let guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    /// Look up a single question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no question has this id.
    pub fn get(&self, id: &QuestionId) -> Result<Question, StorageError> {
        self.all()?
            .into_iter()
            .find(|q| q.id() == id)
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl QuestionSource for InMemoryQuestionBank {
    async fn fetch(
        &self,
        area: &AreaKey,
        subject: Option<&SubjectKey>,
    ) -> Result<Vec<Question>, StorageError> {
        let guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let in_area: Vec<&Question> = guard.iter().filter(|q| q.area() == area).collect();
        if in_area.is_empty() {
            return Err(StorageError::NotFound);
        }

        let Some(subject) = subject else {
            return Ok(in_area.into_iter().cloned().collect());
        };
        let found: Vec<Question> = in_area
            .into_iter()
            .filter(|q| q.subject() == Some(subject))
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(found)
    }

    async fn areas(&self) -> Result<Vec<AreaKey>, StorageError> {
        let guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut areas: Vec<AreaKey> = Vec::new();
        for question in guard.iter() {
            if !areas.contains(question.area()) {
                areas.push(question.area().clone());
            }
        }
        Ok(areas)
    }
}
