use rand::rng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};

use quiz_core::model::{AreaKey, Question, QuestionId, SessionMode, SubjectKey};
use storage::question_bank::QuestionSource;
use storage::repository::StorageError;

use crate::error::SessionError;

/// Questions selected for one run plus the candidate pool they came from.
///
/// The pool is kept so a saved snapshot can be replayed in its own order.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionPlan {
    pub questions: Vec<Question>,
    pub pool: Vec<Question>,
}

impl SessionPlan {
    pub(crate) fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Gathers candidate questions for a mode, then orders and truncates them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuestionPlanner {
    limit: usize,
    shuffle: bool,
}

fn unavailable(err: StorageError) -> SessionError {
    SessionError::SourceUnavailable(err.to_string())
}

/// Fetch, treating an unknown area or subject as empty.
async fn fetch_or_empty(
    source: &dyn QuestionSource,
    area: &AreaKey,
    subject: Option<&SubjectKey>,
) -> Result<Vec<Question>, SessionError> {
    match source.fetch(area, subject).await {
        Ok(questions) => Ok(questions),
        Err(StorageError::NotFound) => Ok(Vec::new()),
        Err(err) => Err(unavailable(err)),
    }
}

fn push_unique(pool: &mut Vec<Question>, seen: &mut HashSet<QuestionId>, batch: Vec<Question>) {
    for question in batch {
        if seen.insert(question.id().clone()) {
            pool.push(question);
        }
    }
}

impl QuestionPlanner {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            shuffle: false,
        }
    }

    pub(crate) fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Every candidate question for `mode`, in bank order.
    pub(crate) async fn gather(
        &self,
        mode: &SessionMode,
        source: &dyn QuestionSource,
    ) -> Result<Vec<Question>, SessionError> {
        let mut pool = Vec::new();
        let mut seen = HashSet::new();

        match mode {
            SessionMode::ByArea { area } | SessionMode::Smart { area } => {
                push_unique(&mut pool, &mut seen, fetch_or_empty(source, area, None).await?);
            }
            SessionMode::BySubject { area, subject } => {
                let batch = fetch_or_empty(source, area, Some(subject)).await?;
                push_unique(&mut pool, &mut seen, batch);
            }
            SessionMode::SingleQuestion { area, question } => {
                let batch = fetch_or_empty(source, area, None).await?;
                let single = batch.into_iter().filter(|q| q.id() == question).take(1).collect();
                push_unique(&mut pool, &mut seen, single);
            }
            SessionMode::Custom { area, subjects, .. } => {
                if subjects.is_empty() {
                    push_unique(&mut pool, &mut seen, fetch_or_empty(source, area, None).await?);
                } else {
                    for subject in subjects {
                        let batch = fetch_or_empty(source, area, Some(subject)).await?;
                        push_unique(&mut pool, &mut seen, batch);
                    }
                }
            }
            SessionMode::Mixed { areas } => {
                for area in Self::resolve_areas(areas, source).await? {
                    push_unique(&mut pool, &mut seen, fetch_or_empty(source, &area, None).await?);
                }
            }
            SessionMode::Favorites { favorites, areas } => {
                for area in Self::resolve_areas(areas, source).await? {
                    let batch = fetch_or_empty(source, &area, None)
                        .await?
                        .into_iter()
                        .filter(|q| favorites.contains(q.id()))
                        .collect();
                    push_unique(&mut pool, &mut seen, batch);
                }
            }
        }

        Ok(pool)
    }

    async fn resolve_areas(
        areas: &[AreaKey],
        source: &dyn QuestionSource,
    ) -> Result<Vec<AreaKey>, SessionError> {
        if areas.is_empty() {
            source.areas().await.map_err(unavailable)
        } else {
            Ok(areas.to_vec())
        }
    }

    /// Order and truncate the pool.
    ///
    /// Smart mode puts previously missed questions first, then unseen ones,
    /// then previously correct ones; shuffling only happens inside a bucket.
    pub(crate) fn select(
        &self,
        mode: &SessionMode,
        pool: Vec<Question>,
        outcomes: &HashMap<QuestionId, bool>,
    ) -> SessionPlan {
        let mut limit = self.limit;
        if let SessionMode::Custom {
            limit: Some(custom), ..
        } = mode
        {
            limit = limit.min(*custom);
        }

        let mut questions = if matches!(mode, SessionMode::Smart { .. }) {
            let mut missed = Vec::new();
            let mut unseen = Vec::new();
            let mut mastered = Vec::new();
            for question in &pool {
                match outcomes.get(question.id()) {
                    Some(false) => missed.push(question.clone()),
                    None => unseen.push(question.clone()),
                    Some(true) => mastered.push(question.clone()),
                }
            }
            for bucket in [&mut missed, &mut unseen, &mut mastered] {
                self.maybe_shuffle(bucket);
            }
            missed.into_iter().chain(unseen).chain(mastered).collect()
        } else {
            let mut all = pool.clone();
            self.maybe_shuffle(&mut all);
            all
        };

        questions.truncate(limit);
        SessionPlan { questions, pool }
    }

    fn maybe_shuffle(&self, questions: &mut [Question]) {
        if self.shuffle {
            questions.shuffle(&mut rng());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::OptionAlias;
    use std::collections::BTreeSet;
    use storage::question_bank::InMemoryQuestionBank;

    fn question(id: &str, area: &str, subject: &str) -> Question {
        Question::new(
            QuestionId::new(id),
            AreaKey::new(area),
            format!("prompt {id}"),
            &["yes", "no"],
            OptionAlias::new('A').unwrap(),
        )
        .unwrap()
        .with_subject(SubjectKey::new(subject))
    }

    fn bank() -> InMemoryQuestionBank {
        InMemoryQuestionBank::with_questions(vec![
            question("m1", "matematica", "algebra"),
            question("m2", "matematica", "algebra"),
            question("m3", "matematica", "geometria"),
            question("m4", "matematica", "geometria"),
            question("f1", "fisica", "cinematica"),
            question("f2", "fisica", "cinematica"),
        ])
    }

    fn ids(questions: &[Question]) -> Vec<&str> {
        questions.iter().map(|q| q.id().as_str()).collect()
    }

    #[tokio::test]
    async fn by_area_keeps_bank_order_and_truncates() {
        let bank = bank();
        let mode = SessionMode::ByArea {
            area: AreaKey::new("matematica"),
        };
        let planner = QuestionPlanner::new(3);
        let pool = planner.gather(&mode, &bank).await.unwrap();
        let plan = planner.select(&mode, pool, &HashMap::new());
        assert_eq!(ids(&plan.questions), vec!["m1", "m2", "m3"]);
        assert_eq!(plan.pool.len(), 4);
    }

    #[tokio::test]
    async fn shuffle_keeps_the_same_questions() {
        let bank = bank();
        let mode = SessionMode::ByArea {
            area: AreaKey::new("matematica"),
        };
        let planner = QuestionPlanner::new(10).with_shuffle(true);
        let pool = planner.gather(&mode, &bank).await.unwrap();
        let plan = planner.select(&mode, pool, &HashMap::new());
        let mut got = ids(&plan.questions);
        got.sort_unstable();
        assert_eq!(got, vec!["m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn unknown_area_is_empty_not_an_error() {
        let bank = bank();
        let mode = SessionMode::ByArea {
            area: AreaKey::new("storia"),
        };
        let pool = QuestionPlanner::new(10).gather(&mode, &bank).await.unwrap();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn mixed_without_areas_unions_every_area() {
        let bank = bank();
        let mode = SessionMode::Mixed { areas: vec![] };
        let pool = QuestionPlanner::new(10).gather(&mode, &bank).await.unwrap();
        assert_eq!(pool.len(), 6);
    }

    #[tokio::test]
    async fn favorites_filter_by_id() {
        let bank = bank();
        let favorites: BTreeSet<QuestionId> =
            [QuestionId::new("m2"), QuestionId::new("f1")].into_iter().collect();
        let mode = SessionMode::Favorites {
            favorites,
            areas: vec![],
        };
        let mut got: Vec<String> = QuestionPlanner::new(10)
            .gather(&mode, &bank)
            .await
            .unwrap()
            .iter()
            .map(|q| q.id().to_string())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec!["f1", "m2"]);
    }

    #[tokio::test]
    async fn single_question_yields_one_element() {
        let bank = bank();
        let mode = SessionMode::SingleQuestion {
            area: AreaKey::new("matematica"),
            question: QuestionId::new("m3"),
        };
        let pool = QuestionPlanner::new(10).gather(&mode, &bank).await.unwrap();
        assert_eq!(ids(&pool), vec!["m3"]);
    }

    #[tokio::test]
    async fn custom_unions_subjects_and_applies_its_limit() {
        let bank = bank();
        let mode = SessionMode::Custom {
            area: AreaKey::new("matematica"),
            subjects: vec![SubjectKey::new("geometria"), SubjectKey::new("algebra")],
            limit: Some(3),
        };
        let planner = QuestionPlanner::new(10);
        let pool = planner.gather(&mode, &bank).await.unwrap();
        let plan = planner.select(&mode, pool, &HashMap::new());
        assert_eq!(ids(&plan.questions), vec!["m3", "m4", "m1"]);
    }

    #[tokio::test]
    async fn smart_orders_missed_then_unseen_then_correct() {
        let bank = bank();
        let mode = SessionMode::Smart {
            area: AreaKey::new("matematica"),
        };
        let outcomes: HashMap<QuestionId, bool> = [
            (QuestionId::new("m1"), true),
            (QuestionId::new("m3"), false),
        ]
        .into_iter()
        .collect();
        let planner = QuestionPlanner::new(10);
        let pool = planner.gather(&mode, &bank).await.unwrap();
        let plan = planner.select(&mode, pool, &outcomes);
        assert_eq!(ids(&plan.questions), vec!["m3", "m2", "m4", "m1"]);
    }
}
