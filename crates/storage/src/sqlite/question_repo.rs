use async_trait::async_trait;
use quiz_core::model::{AreaKey, Question, SubjectKey};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::question_bank::QuestionSource;
use crate::repository::StorageError;

use super::SqliteRepository;

fn map_question(row: &SqliteRow) -> Result<Question, StorageError> {
    let payload: String = row
        .try_get("payload")
        .map_err(|err| StorageError::Serialization(err.to_string()))?;
    serde_json::from_str(&payload).map_err(|err| StorageError::Serialization(err.to_string()))
}

impl SqliteRepository {
    /// Insert or replace questions by id inside one transaction.
    ///
    /// New questions are appended after the existing ones; replaced questions
    /// keep their position.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if encoding or any write fails.
    pub async fn upsert_questions(&self, questions: &[Question]) -> Result<usize, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        for question in questions {
            let payload = serde_json::to_string(question)
                .map_err(|err| StorageError::Serialization(err.to_string()))?;
            sqlx::query(
                r"
                INSERT INTO questions (id, area, subject, position, payload)
                VALUES (
                    ?1,
                    ?2,
                    ?3,
                    (SELECT COALESCE(MAX(position), 0) + 1 FROM questions),
                    ?4
                )
                ON CONFLICT(id) DO UPDATE SET
                    area = excluded.area,
                    subject = excluded.subject,
                    payload = excluded.payload
                ",
            )
            .bind(question.id().as_str())
            .bind(question.area().as_str())
            .bind(question.subject().map(SubjectKey::as_str))
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(questions.len())
    }
}

#[async_trait]
impl QuestionSource for SqliteRepository {
    async fn fetch(
        &self,
        area: &AreaKey,
        subject: Option<&SubjectKey>,
    ) -> Result<Vec<Question>, StorageError> {
        let rows = match subject {
            Some(subject) => {
                sqlx::query(
                    r"
                    SELECT payload FROM questions
                    WHERE area = ?1 AND subject = ?2
                    ORDER BY position
                    ",
                )
                .bind(area.as_str())
                .bind(subject.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r"
                    SELECT payload FROM questions
                    WHERE area = ?1
                    ORDER BY position
                    ",
                )
                .bind(area.as_str())
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        if rows.is_empty() {
            return Err(StorageError::NotFound);
        }
        rows.iter().map(map_question).collect()
    }

    async fn areas(&self) -> Result<Vec<AreaKey>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT area, MIN(position) AS first_position
            FROM questions
            GROUP BY area
            ORDER BY first_position
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("area")
                    .map(AreaKey::new)
                    .map_err(|err| StorageError::Serialization(err.to_string()))
            })
            .collect()
    }
}
