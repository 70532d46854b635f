//! Conditional navigation over a form's question graph.
//!
//! The engine reads answers only; persisting them is the answer cache's job.

use std::collections::{HashMap, HashSet};

use crate::model::{
    AnswerValue, Catalog, ExitKey, Question, QuestionId, QuestionUid, StoredAnswer,
};

/// What to show after the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Question(QuestionId),
    Exit { exit_key: Option<ExitKey> },
}

impl NextAction {
    #[must_use]
    pub fn should_exit(&self) -> bool {
        matches!(self, Self::Exit { .. })
    }

    #[must_use]
    pub fn next_question_id(&self) -> Option<&QuestionId> {
        match self {
            Self::Question(id) => Some(id),
            Self::Exit { .. } => None,
        }
    }

    #[must_use]
    pub fn exit_key(&self) -> Option<&ExitKey> {
        match self {
            Self::Exit { exit_key } => exit_key.as_ref(),
            Self::Question(_) => None,
        }
    }

    fn exit(exit_key: Option<ExitKey>) -> Self {
        Self::Exit { exit_key }
    }
}

/// Decides the next question from the catalog, the rule set and the answers
/// recorded so far in this session.
#[derive(Debug, Clone)]
pub struct NavigationEngine {
    catalog: Catalog,
    answers: HashMap<QuestionUid, AnswerValue>,
}

impl NavigationEngine {
    /// Build an engine seeded with previously stored answers.
    ///
    /// Stored answers are keyed by question id; ids missing from the catalog
    /// are dropped.
    #[must_use]
    pub fn new(catalog: Catalog, initial: &[StoredAnswer]) -> Self {
        for rule in catalog.dangling_rules() {
            tracing::warn!(
                question_id = %rule.question_id,
                target = ?rule.target_question_id,
                order = rule.order,
                "Branching rule references a question outside the catalog"
            );
        }

        let mut answers = HashMap::with_capacity(initial.len());
        for stored in initial {
            match catalog.by_id(&stored.question_id) {
                Some(q) => {
                    answers.insert(q.uid().clone(), stored.value.clone());
                }
                None => tracing::debug!(
                    question_id = %stored.question_id,
                    "Dropping stored answer for unknown question"
                ),
            }
        }

        Self { catalog, answers }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        self.catalog.questions()
    }

    #[must_use]
    pub fn question_by_uid(&self, uid: &QuestionUid) -> Option<&Question> {
        self.catalog.by_uid(uid)
    }

    #[must_use]
    pub fn question_by_id(&self, id: &QuestionId) -> Option<&Question> {
        self.catalog.by_id(id)
    }

    #[must_use]
    pub fn answer(&self, uid: &QuestionUid) -> Option<&AnswerValue> {
        self.answers.get(uid)
    }

    /// Record the latest value locally. The caller also owes the answer cache
    /// an update; the engine has no way to persist.
    pub fn update_answer(&mut self, uid: QuestionUid, value: AnswerValue) {
        tracing::trace!(uid = %uid, value = ?value, "Navigation answer updated");
        self.answers.insert(uid, value);
    }

    /// Decide where to go after `current`, or where to start when `None`.
    #[must_use]
    pub fn next_action(&self, current: Option<&QuestionUid>) -> NextAction {
        let Some(current_uid) = current else {
            return match self.catalog.first() {
                Some(first) => NextAction::Question(first.id().clone()),
                None => NextAction::exit(None),
            };
        };

        let Some(index) = self.catalog.index_of_uid(current_uid) else {
            tracing::debug!(uid = %current_uid, "Current question not in catalog, exiting");
            return NextAction::exit(None);
        };
        let question = &self.catalog.questions()[index];
        let answer = self.answers.get(current_uid);

        for rule in self.catalog.rules_for(question.id()) {
            let matched = rule.matches(answer);
            tracing::debug!(
                uid = %current_uid,
                operator = rule.operator.as_str(),
                order = rule.order,
                matched,
                "Evaluated branching rule"
            );
            if !matched {
                continue;
            }
            match &rule.target_question_id {
                Some(target) if self.catalog.by_id(target).is_some() => {
                    return NextAction::Question(target.clone());
                }
                Some(target) => {
                    tracing::warn!(
                        uid = %current_uid,
                        target = %target,
                        "Matched rule targets an unknown question; skipping it"
                    );
                }
                None => return NextAction::exit(rule.exit_key.clone()),
            }
        }

        match self.catalog.questions().get(index + 1) {
            Some(next) => NextAction::Question(next.id().clone()),
            None => NextAction::exit(Some(ExitKey::success())),
        }
    }

    /// Position-based percentage: `round(100 * (index + 1) / total)`.
    ///
    /// Branching can make this move backwards; that is expected.
    #[must_use]
    pub fn calculate_progress(&self, current: Option<&QuestionUid>) -> u8 {
        let Some(index) = current.and_then(|uid| self.catalog.index_of_uid(uid)) else {
            return 0;
        };
        let total = self.catalog.len();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pct = ((index + 1) as f64 * 100.0 / total as f64).round() as u8;
        pct
    }

    /// Uids whose recorded value is present (non-blank).
    #[must_use]
    pub fn answered_questions(&self) -> HashSet<QuestionUid> {
        self.answers
            .iter()
            .filter(|(_, value)| value.is_present())
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// Every required question has *some* recorded value, blank or not.
    ///
    /// Intentionally looser than [`Self::answered_questions`].
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.catalog
            .questions()
            .iter()
            .filter(|q| q.is_required())
            .all(|q| self.answers.contains_key(q.uid()))
    }

    /// Optional questions can always be left; required ones need a present answer.
    #[must_use]
    pub fn can_proceed(&self, uid: &QuestionUid) -> bool {
        match self.catalog.by_uid(uid) {
            Some(q) if !q.is_required() => true,
            Some(_) => self.answers.get(uid).is_some_and(AnswerValue::is_present),
            None => false,
        }
    }

    /// Linear predecessor by catalog order.
    #[must_use]
    pub fn previous_question(&self, uid: &QuestionUid) -> Option<&Question> {
        let index = self.catalog.index_of_uid(uid)?;
        index
            .checked_sub(1)
            .and_then(|prev| self.catalog.questions().get(prev))
    }
}
