use std::collections::HashMap;

use crate::model::{BranchingRule, Question, QuestionId, QuestionUid};

/// The question catalog and rule set of one form version.
///
/// Both collections are normalized by ascending `order` (stable for ties) and
/// rule values are decoded once here, so everything downstream can treat the
/// catalog as read-only.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    questions: Vec<Question>,
    rules: Vec<BranchingRule>,
    by_id: HashMap<QuestionId, usize>,
    by_uid: HashMap<QuestionUid, usize>,
}

impl Catalog {
    #[must_use]
    pub fn new(mut questions: Vec<Question>, mut rules: Vec<BranchingRule>) -> Self {
        questions.sort_by_key(Question::order);
        rules.sort_by_key(|r| r.order);
        for rule in &mut rules {
            rule.decode_value();
        }

        let mut by_id = HashMap::with_capacity(questions.len());
        let mut by_uid = HashMap::with_capacity(questions.len());
        for (idx, q) in questions.iter().enumerate() {
            // First occurrence wins, matching a linear scan.
            by_id.entry(q.id().clone()).or_insert(idx);
            by_uid.entry(q.uid().clone()).or_insert(idx);
        }

        Self {
            questions,
            rules,
            by_id,
            by_uid,
        }
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn rules(&self) -> &[BranchingRule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Question> {
        self.questions.first()
    }

    #[must_use]
    pub fn index_of_uid(&self, uid: &QuestionUid) -> Option<usize> {
        self.by_uid.get(uid).copied()
    }

    #[must_use]
    pub fn by_uid(&self, uid: &QuestionUid) -> Option<&Question> {
        self.index_of_uid(uid).map(|idx| &self.questions[idx])
    }

    #[must_use]
    pub fn by_id(&self, id: &QuestionId) -> Option<&Question> {
        self.by_id.get(id).map(|&idx| &self.questions[idx])
    }

    /// Rules attached to a source question, in ascending `order`.
    pub fn rules_for<'a>(&'a self, id: &'a QuestionId) -> impl Iterator<Item = &'a BranchingRule> {
        self.rules.iter().filter(move |r| &r.question_id == id)
    }

    /// Rules whose source or target question is not in the catalog.
    #[must_use]
    pub fn dangling_rules(&self) -> Vec<&BranchingRule> {
        self.rules
            .iter()
            .filter(|r| {
                !self.by_id.contains_key(&r.question_id)
                    || r
                        .target_question_id
                        .as_ref()
                        .is_some_and(|t| !self.by_id.contains_key(t))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuestionType, RuleOperator};
    use serde_json::json;

    fn q(id: &str, order: i32) -> Question {
        Question::new(id, format!("uid-{id}"), id, QuestionType::ShortText, false, order).unwrap()
    }

    #[test]
    fn normalizes_by_order() {
        let catalog = Catalog::new(
            vec![q("c", 3), q("a", 1), q("b", 2)],
            vec![
                BranchingRule::new("a", RuleOperator::IsEmpty, json!(null), 2).goto("c"),
                BranchingRule::new("a", RuleOperator::Equals, json!("x"), 1).goto("b"),
            ],
        );
        let ids: Vec<_> = catalog.questions().iter().map(|q| q.id().as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let orders: Vec<_> = catalog.rules_for(&QuestionId::from("a")).map(|r| r.order).collect();
        assert_eq!(orders, [1, 2]);
    }

    #[test]
    fn lookups_by_id_and_uid() {
        let catalog = Catalog::new(vec![q("a", 1), q("b", 2)], vec![]);
        assert_eq!(catalog.by_id(&QuestionId::from("b")).unwrap().order(), 2);
        assert_eq!(catalog.index_of_uid(&QuestionUid::from("uid-b")), Some(1));
        assert!(catalog.by_uid(&QuestionUid::from("missing")).is_none());
    }

    #[test]
    fn reports_dangling_rules() {
        let catalog = Catalog::new(
            vec![q("a", 1)],
            vec![
                BranchingRule::new("a", RuleOperator::IsEmpty, json!(null), 1).goto("ghost"),
                BranchingRule::new("a", RuleOperator::IsEmpty, json!(null), 2).exit("done"),
                BranchingRule::new("zzz", RuleOperator::IsEmpty, json!(null), 3),
            ],
        );
        let dangling: Vec<_> = catalog.dangling_rules().iter().map(|r| r.order).collect();
        assert_eq!(dangling, [1, 3]);
    }
}
